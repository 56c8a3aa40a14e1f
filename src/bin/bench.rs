use crossbeam_utils::thread::scope;
use log::{debug, info};
use rand::prelude::*;
use std::cmp::max;
use std::io::{stdout, Write};
use std::mem::ManuallyDrop;
use std::path::Path;
use std::sync::{mpsc, Arc, Barrier};
use std::time::Instant;

use rotate_skiplist::config::map::{setup, BenchWriter, Config, Op, Perf};
use rotate_skiplist::{ConcurrentMap, RotateSkiplist};

#[cfg(all(not(feature = "sanitize"), target_os = "linux"))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() {
    env_logger::init();
    let (config, output) = setup(
        Path::new(file!())
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .unwrap(),
    );
    bench(&config, output);
}

fn bench(config: &Config, output: BenchWriter) {
    println!("{}", config);
    let perf = bench_map(
        config,
        RotateSkiplist::<usize, usize>::with_options(config.options),
    );
    if let Err(e) = output.write_record(config, &perf) {
        log::error!("failed to write the record: {}", e);
    }
    println!("{}", perf);
}

/// Inserts keys in a decreasing order with a single thread, so that each insert lands at the
/// front of level 0. Only the inserter's own level 1 attempt runs here; the traversals of the
/// measured run build the higher levels.
fn prefill<M: ConcurrentMap<usize, usize> + Send + Sync>(config: &Config, map: &M) {
    let rng = &mut rand::thread_rng();
    let mut keys = Vec::with_capacity(config.prefill);
    for _ in 0..config.prefill {
        keys.push(config.key_dist.sample(rng));
    }
    keys.sort_by(|a, b| b.cmp(a));
    for key in keys.drain(..) {
        let value = key;
        map.insert(key, value);
    }
    print!("prefilled... ");
    stdout().flush().unwrap();
}

fn bench_map<M: ConcurrentMap<usize, usize> + Send + Sync>(config: &Config, map: M) -> Perf {
    let map = &map;
    prefill(config, map);

    let barrier = &Arc::new(Barrier::new(config.threads + config.aux_thread));
    let (ops_sender, ops_receiver) = mpsc::channel();
    let (mem_sender, mem_receiver) = mpsc::channel();

    scope(|s| {
        // sampling & interference thread
        if config.aux_thread > 0 {
            let mem_sender = mem_sender.clone();
            s.spawn(move |_| {
                let mut samples = 0usize;
                let mut acc = 0usize;
                let mut peak = 0usize;
                let mut garb_acc = 0usize;
                let mut garb_peak = 0usize;
                barrier.clone().wait();

                let start = Instant::now();
                // Immediately drop if no non-coop else keep it and repin periodically.
                let mut guard = ManuallyDrop::new(rotate_ebr::pin());
                if config.non_coop == 0 {
                    unsafe { ManuallyDrop::drop(&mut guard) };
                }
                let mut next_sampling = start + config.sampling_period;
                let mut next_repin = start + config.non_coop_period;
                while start.elapsed() < config.duration {
                    let now = Instant::now();
                    if now > next_sampling {
                        let allocated = config.mem_sampler.sample();
                        samples += 1;

                        acc += allocated;
                        peak = max(peak, allocated);

                        let garbages = rotate_ebr::garbage_count();
                        garb_acc += garbages;
                        garb_peak = max(garb_peak, garbages);

                        next_sampling = now + config.sampling_period;
                    }
                    if config.non_coop > 0 && now > next_repin {
                        (*guard).repin();
                        next_repin = now + config.non_coop_period;
                    }
                    std::thread::sleep(config.aux_thread_period);
                }

                if config.non_coop > 0 {
                    unsafe { ManuallyDrop::drop(&mut guard) };
                }

                if config.sampling && samples > 0 {
                    mem_sender
                        .send((peak, acc / samples, garb_peak, garb_acc / samples))
                        .unwrap();
                } else {
                    mem_sender.send((0, 0, 0, 0)).unwrap();
                }
            });
        } else {
            mem_sender.send((0, 0, 0, 0)).unwrap();
        }

        for _ in 0..config.threads {
            let ops_sender = ops_sender.clone();
            s.spawn(move |_| {
                let mut ops: u64 = 0;
                let mut rng = &mut rand::thread_rng();
                barrier.clone().wait();
                let start = Instant::now();

                while start.elapsed() < config.duration {
                    let key = config.key_dist.sample(rng);
                    match Op::OPS[config.op_dist.sample(&mut rng)] {
                        Op::Get => {
                            map.get(&key);
                        }
                        Op::Insert => {
                            let value = key;
                            map.insert(key, value);
                        }
                        Op::Remove => {
                            map.remove(&key);
                        }
                    }
                    ops += 1;
                }

                ops_sender.send(ops).unwrap();
            });
        }
    })
    .unwrap();
    println!("end");
    debug!(
        "garbage left after the run: {}",
        rotate_ebr::garbage_count()
    );

    let mut ops = 0;
    for _ in 0..config.threads {
        let local_ops = ops_receiver.recv().unwrap();
        ops += local_ops;
    }
    let ops_per_sec = ops / config.interval;
    let (peak_mem, avg_mem, peak_garb, avg_garb) = mem_receiver.recv().unwrap();
    info!("{} operations in {}s", ops, config.interval);
    Perf {
        ops_per_sec,
        peak_mem,
        avg_mem,
        peak_garb,
        avg_garb,
    }
}
