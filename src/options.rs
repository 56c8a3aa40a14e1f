use log::warn;

/// Upper bound of [`SkipListOptions::max_level`].
pub const MAX_LEVEL_LIMIT: usize = 64;

pub const DEFAULT_MAX_LEVEL: usize = 32;

pub const DEFAULT_PROMOTION_PROBABILITY: f64 = 0.5;

/// Construction options of a [`RotateSkiplist`](crate::RotateSkiplist).
///
/// ```
/// use rotate_skiplist::SkipListOptions;
///
/// let options = SkipListOptions::new()
///     .max_level(16)
///     .promotion_probability(0.25)
///     .upsert_on_duplicate(true);
/// assert_eq!(options.get_max_level(), 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkipListOptions {
    max_level: usize,
    promotion_probability: f64,
    upsert_on_duplicate: bool,
}

impl Default for SkipListOptions {
    fn default() -> Self {
        Self {
            max_level: DEFAULT_MAX_LEVEL,
            promotion_probability: DEFAULT_PROMOTION_PROBABILITY,
            upsert_on_duplicate: false,
        }
    }
}

impl SkipListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of index levels, including level 0. Clamped to `1..=MAX_LEVEL_LIMIT`.
    pub fn max_level(mut self, max_level: usize) -> Self {
        let clamped = max_level.clamp(1, MAX_LEVEL_LIMIT);
        if clamped != max_level {
            warn!("max_level {} out of range, using {}", max_level, clamped);
        }
        self.max_level = clamped;
        self
    }

    /// Probability that a node at height `h` targets height `h + 1`. Must be in `(0, 1)`;
    /// anything else falls back to the default.
    pub fn promotion_probability(mut self, probability: f64) -> Self {
        if probability > 0.0 && probability < 1.0 {
            self.promotion_probability = probability;
        } else {
            warn!(
                "promotion probability {} out of range, using {}",
                probability, DEFAULT_PROMOTION_PROBABILITY
            );
            self.promotion_probability = DEFAULT_PROMOTION_PROBABILITY;
        }
        self
    }

    /// Whether `insert` replaces the value of an existing key instead of failing.
    pub fn upsert_on_duplicate(mut self, upsert: bool) -> Self {
        self.upsert_on_duplicate = upsert;
        self
    }

    #[inline]
    pub fn get_max_level(&self) -> usize {
        self.max_level
    }

    #[inline]
    pub fn get_promotion_probability(&self) -> f64 {
        self.promotion_probability
    }

    #[inline]
    pub fn get_upsert_on_duplicate(&self) -> bool {
        self.upsert_on_duplicate
    }

    /// Draws the height a new node will eventually be promoted to.
    pub(crate) fn random_height(&self) -> usize {
        let mut height = 1;
        while height < self.max_level && rand::random::<f64>() < self.promotion_probability {
            height += 1;
        }
        height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_values_are_clamped() {
        let options = SkipListOptions::new()
            .max_level(0)
            .promotion_probability(1.5);
        assert_eq!(options.get_max_level(), 1);
        assert_eq!(
            options.get_promotion_probability(),
            DEFAULT_PROMOTION_PROBABILITY
        );
        assert_eq!(
            SkipListOptions::new().max_level(1000).get_max_level(),
            MAX_LEVEL_LIMIT
        );
    }

    #[test]
    fn heights_stay_in_range() {
        let options = SkipListOptions::new().max_level(4).promotion_probability(0.9);
        for _ in 0..1000 {
            let height = options.random_height();
            assert!((1..=4).contains(&height));
        }
        let flat = SkipListOptions::new().max_level(1);
        assert!((0..100).all(|_| flat.random_height() == 1));
    }
}
