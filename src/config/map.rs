use crate::options::SkipListOptions;
use crate::MemSampler;
use clap::{value_parser, Arg, ArgAction, Command};
use csv::Writer;
use log::{info, warn};
use rand::distributions::{Uniform, WeightedIndex};
use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::Path;
use std::time::Duration;

#[derive(PartialEq, Debug)]
pub enum Op {
    Get,
    Insert,
    Remove,
}

impl Op {
    pub const OPS: [Op; 3] = [Op::Get, Op::Insert, Op::Remove];
}

#[derive(Clone, Copy, PartialEq)]
pub enum GetRate {
    WriteOnly = 0,
    ReadWrite = 1,
    ReadIntensive = 2,
    ReadOnly = 3,
}

pub struct Config {
    pub bench: String,
    pub threads: usize,

    pub aux_thread: usize,
    pub aux_thread_period: Duration,
    pub non_coop: u8,
    pub non_coop_period: Duration,
    pub sampling: bool,
    pub sampling_period: Duration,

    pub get_rate: GetRate,
    pub op_dist: WeightedIndex<i32>,
    pub key_dist: Uniform<usize>,
    pub prefill: usize,
    pub key_range: usize,
    pub interval: u64,
    pub duration: Duration,

    pub options: SkipListOptions,

    pub mem_sampler: MemSampler,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} threads, n{}, g{}, l{}, p{}",
            self.bench,
            self.threads,
            self.non_coop,
            self.get_rate as u8,
            self.options.get_max_level(),
            self.options.get_promotion_probability(),
        )
    }
}

pub struct BenchWriter {
    output: Option<Writer<File>>,
}

#[derive(Clone)]
pub struct Perf {
    pub ops_per_sec: u64,
    pub peak_mem: usize,
    pub avg_mem: usize,
    pub peak_garb: usize,
    pub avg_garb: usize,
}

impl fmt::Display for Perf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ops/s: {}, peak mem: {}, avg_mem: {}, peak garb: {}, avg garb: {}",
            self.ops_per_sec,
            readable_bytes(self.peak_mem),
            readable_bytes(self.avg_mem),
            self.peak_garb,
            self.avg_garb
        )
    }
}

fn readable_bytes(num: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    for (i, unit) in UNITS.iter().enumerate() {
        if num / 2usize.pow(i as u32 * 10) < 1000 {
            return format!("{:.3} {}", num as f64 / 2f64.powf(i as f64 * 10.0), unit);
        }
    }
    format!(
        "{:.3} {}",
        num as f64 / 2f64.powf((UNITS.len() - 1) as f64 * 10.0),
        UNITS[UNITS.len() - 1]
    )
}

const HEADER: [&str; 13] = [
    "bench",
    "threads",
    "sampling_period",
    "non_coop",
    "get_rate",
    "max_level",
    "promotion_probability",
    "throughput",
    "peak_mem",
    "avg_mem",
    "peak_garb",
    "avg_garb",
    "key_range",
];

impl BenchWriter {
    pub fn write_record(self, config: &Config, perf: &Perf) -> csv::Result<()> {
        if let Some(mut output) = self.output {
            output.write_record(&[
                config.bench.clone(),
                config.threads.to_string(),
                config.sampling_period.as_millis().to_string(),
                config.non_coop.to_string(),
                (config.get_rate as u8).to_string(),
                config.options.get_max_level().to_string(),
                config.options.get_promotion_probability().to_string(),
                perf.ops_per_sec.to_string(),
                perf.peak_mem.to_string(),
                perf.avg_mem.to_string(),
                perf.peak_garb.to_string(),
                perf.avg_garb.to_string(),
                config.key_range.to_string(),
            ])?;
            output.flush()?;
        }
        Ok(())
    }
}

/// Opens `path` for appending, writing the header if the file is new.
fn open_output(path: &Path) -> csv::Result<Writer<File>> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    match OpenOptions::new().read(true).append(true).open(path) {
        Ok(f) => Ok(csv::Writer::from_writer(f)),
        Err(_) => {
            let f = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?;
            let mut output = csv::Writer::from_writer(f);
            // NOTE: `write_record` on `bench`
            output.write_record(HEADER)?;
            output.flush()?;
            Ok(output)
        }
    }
}

fn command(bench: String) -> Command {
    Command::new(bench)
        .arg(
            Arg::new("threads")
                .short('t')
                .value_parser(value_parser!(usize))
                .required(true)
                .help("Numbers of threads to run."),
        )
        .arg(
            Arg::new("non-coop")
                .short('n')
                .help(
                    "The degree of non-cooperation: an extra thread holding a critical section. \
                     1: 1ms, 2: 10ms, 3: stall",
                )
                .value_parser(value_parser!(u8).range(0..4))
                .default_value("0"),
        )
        .arg(
            Arg::new("get rate")
                .short('g')
                .help(
                    "The proportion of `get`(read) operations. \
                     0: 0%, 1: 50%, 2: 90%, 3: 100%",
                )
                .value_parser(value_parser!(u8).range(0..4))
                .default_value("0"),
        )
        .arg(
            Arg::new("range")
                .short('r')
                .value_parser(value_parser!(u64).range(1..))
                .help("Key range: [0..RANGE]")
                .default_value("100000"),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .value_parser(value_parser!(u64).range(1..))
                .help("Time interval in seconds to run the benchmark")
                .default_value("10"),
        )
        .arg(
            Arg::new("sampling period")
                .short('s')
                .value_parser(value_parser!(u64))
                .help(
                    "The period to query jemalloc stats.allocated (ms). 0 for no sampling. \
                     Only supported on linux.",
                )
                .default_value("1"),
        )
        .arg(
            Arg::new("max level")
                .short('l')
                .value_parser(value_parser!(usize))
                .help("Number of index levels of the skip list")
                .default_value("32"),
        )
        .arg(
            Arg::new("promotion probability")
                .short('p')
                .value_parser(value_parser!(f64))
                .help("Probability that a node is promoted one more level")
                .default_value("0.5"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .help("Output CSV filename. Appends the data if the file already exists."),
        )
        .arg(
            Arg::new("dry run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Check whether the arguments are parsable, without running a benchmark"),
        )
}

pub fn setup(bench: String) -> (Config, BenchWriter) {
    let m = command(bench.clone()).get_matches();

    let threads = m.get_one::<usize>("threads").copied().unwrap();
    let non_coop = m.get_one::<u8>("non-coop").copied().unwrap();
    let get_rate = match m.get_one::<u8>("get rate").copied().unwrap() {
        0 => GetRate::WriteOnly,
        1 => GetRate::ReadWrite,
        2 => GetRate::ReadIntensive,
        3 => GetRate::ReadOnly,
        _ => unreachable!("get_rate is invalid"),
    };
    let key_range = m.get_one::<u64>("range").copied().unwrap() as usize;
    let prefill = key_range / 2;
    let key_dist = Uniform::from(0..key_range);
    let interval = m.get_one::<u64>("interval").copied().unwrap();
    let sampling_period = m.get_one::<u64>("sampling period").copied().unwrap();
    let sampling = sampling_period > 0 && cfg!(all(not(feature = "sanitize"), target_os = "linux"));
    let duration = Duration::from_secs(interval);

    let options = SkipListOptions::new()
        .max_level(m.get_one::<usize>("max level").copied().unwrap())
        .promotion_probability(m.get_one::<f64>("promotion probability").copied().unwrap());

    let op_weights = match get_rate {
        GetRate::WriteOnly => &[0, 1, 1],
        GetRate::ReadWrite => &[2, 1, 1],
        GetRate::ReadIntensive => &[18, 1, 1],
        GetRate::ReadOnly => &[1, 0, 0],
    };
    let op_dist = WeightedIndex::new(op_weights).unwrap();

    let output = m.get_one::<String>("output").and_then(|output_name| {
        match open_output(Path::new(output_name)) {
            Ok(output) => Some(output),
            Err(e) => {
                warn!("cannot open {}: {}; results will not be saved", output_name, e);
                None
            }
        }
    });
    let mem_sampler = MemSampler::new();
    let config = Config {
        bench,
        threads,

        aux_thread: if sampling || non_coop > 0 { 1 } else { 0 },
        aux_thread_period: Duration::from_millis(1),
        non_coop,
        non_coop_period: match non_coop {
            1 => Duration::from_millis(1),
            2 => Duration::from_millis(10),
            // No repin if -n0 or -n3
            _ => Duration::from_secs(interval),
        },
        sampling,
        sampling_period: Duration::from_millis(sampling_period),

        get_rate,
        op_dist,
        key_dist,
        prefill,
        key_range,
        interval,
        duration,

        options,

        mem_sampler,
    };

    if m.get_flag("dry run") {
        info!("arguments are valid: {}", config);
        std::process::exit(0);
    }

    (config, BenchWriter { output })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_bytes_picks_unit() {
        assert_eq!(readable_bytes(512), "512.000 B");
        assert_eq!(readable_bytes(2048), "2.000 KiB");
        assert_eq!(readable_bytes(3 << 20), "3.000 MiB");
    }

    #[test]
    fn command_parses_skip_list_flags() {
        let m = command("bench".to_string())
            .try_get_matches_from(["bench", "-t", "4", "-l", "16", "-p", "0.25", "-g", "2"])
            .unwrap();
        assert_eq!(m.get_one::<usize>("threads").copied(), Some(4));
        assert_eq!(m.get_one::<usize>("max level").copied(), Some(16));
        assert_eq!(m.get_one::<f64>("promotion probability").copied(), Some(0.25));
        assert_eq!(m.get_one::<u8>("get rate").copied(), Some(2));
        assert_eq!(m.get_one::<u64>("range").copied(), Some(100000));
        assert!(!m.get_flag("dry run"));

        assert!(command("bench".to_string())
            .try_get_matches_from(["bench", "-t", "4", "-g", "7"])
            .is_err());
    }
}
