use crate::buffer::BufferConfig;
use crate::coord::{Coordinator, MemoryCoordinator};
use crate::error::Error;
use crate::generator::{BreadcrumbEngine, ClockEngine, CounterSettings, Layout, SpinConfig};
use crate::spawn::{Spawn, ThreadSpawner};
use crate::time::{SNOWFLAKE_EPOCH, TimeSource};
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::thread::scope;

/// Replays a fixed list of ticks, then repeats the last one forever.
struct ScriptedTime {
    ticks: Mutex<VecDeque<u64>>,
    last: Mutex<u64>,
}

impl ScriptedTime {
    fn new(ticks: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ticks: Mutex::new(ticks.into_iter().collect()),
            last: Mutex::new(0),
        }
    }
}

impl TimeSource for ScriptedTime {
    fn current_tick(&self) -> u64 {
        let mut last = self.last.lock();
        if let Some(tick) = self.ticks.lock().pop_front() {
            *last = tick;
        }
        *last
    }
}

struct FixedTime(u64);

impl TimeSource for FixedTime {
    fn current_tick(&self) -> u64 {
        self.0
    }
}

const EPOCH_MS: u64 = SNOWFLAKE_EPOCH.as_millis() as u64;
const NOW_MS: u64 = 1_700_000_000_000;

fn binary<T: TimeSource>(worker_bits: u8, sequence_bits: u8, worker_id: u64, time: T) -> ClockEngine<T> {
    ClockEngine::new("binary", Layout::Binary, worker_bits, sequence_bits, worker_id, time)
        .unwrap()
        .with_spin(SpinConfig {
            spin_loops: 16,
            yield_every: 4,
            initial_backoff: Duration::from_micros(10),
            max_backoff: Duration::from_millis(1),
        })
}

#[test]
fn binary_layout_packs_fields() {
    let engine = binary(10, 12, 1, FixedTime(EPOCH_MS + 1));
    assert_eq!(engine.next_id().unwrap(), (1 << 22) | (1 << 12));
    assert_eq!(engine.next_id().unwrap(), (1 << 22) | (1 << 12) | 1);
    assert_eq!(engine.decompose((1 << 22) | (1 << 12) | 1), (EPOCH_MS + 1, 1, 1));
}

#[test]
fn decimal_layout_packs_digits() {
    let engine = ClockEngine::new(
        "decimal",
        Layout::Decimal,
        3,
        4,
        5,
        FixedTime(170_424_191_230),
    )
    .unwrap();
    assert_eq!(engine.next_id().unwrap(), 1_704_241_912_300_050_000);
    assert_eq!(engine.next_id().unwrap(), 1_704_241_912_300_050_001);
    assert_eq!(
        engine.decompose(1_704_241_912_300_050_001),
        (170_424_191_230, 5, 1)
    );
}

#[test]
fn sequence_restarts_on_new_tick() {
    let engine = binary(10, 12, 0, ScriptedTime::new([NOW_MS, NOW_MS, NOW_MS + 1]));
    let a = engine.next_id().unwrap();
    let b = engine.next_id().unwrap();
    let c = engine.next_id().unwrap();
    assert_eq!(engine.decompose(a), (NOW_MS, 0, 0));
    assert_eq!(engine.decompose(b), (NOW_MS, 0, 1));
    assert_eq!(engine.decompose(c), (NOW_MS + 1, 0, 0));
}

#[test]
fn one_bit_sequence_rolls_into_next_tick() {
    let engine = binary(21, 1, 3, ScriptedTime::new([NOW_MS, NOW_MS, NOW_MS, NOW_MS + 1]));
    let a = engine.next_id().unwrap();
    let b = engine.next_id().unwrap();
    let c = engine.next_id().unwrap();

    assert_eq!(engine.decompose(a), (NOW_MS, 3, 0));
    assert_eq!(engine.decompose(b), (NOW_MS, 3, 1));
    assert_eq!(engine.decompose(c), (NOW_MS + 1, 3, 0));
    assert!(a < b && b < c);
}

#[test]
fn decimal_sequence_overflow_waits_for_next_second() {
    let tick = 170_424_191_230;
    let mut ticks = vec![tick; 11];
    ticks.push(tick + 1);
    let engine = ClockEngine::new("decimal", Layout::Decimal, 6, 1, 42, ScriptedTime::new(ticks))
        .unwrap()
        .with_spin(SpinConfig {
            spin_loops: 4,
            yield_every: 0,
            initial_backoff: Duration::from_micros(10),
            max_backoff: Duration::from_micros(10),
        });

    let ids: Vec<i64> = (0..11).map(|_| engine.next_id().unwrap()).collect();
    for (i, id) in ids.iter().take(10).enumerate() {
        assert_eq!(engine.decompose(*id), (tick, 42, i as u64));
    }
    assert_eq!(engine.decompose(ids[10]), (tick + 1, 42, 0));
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn clock_moving_backwards_is_refused_without_state_change() {
    let engine = binary(10, 12, 0, ScriptedTime::new([NOW_MS, NOW_MS - 5, NOW_MS]));
    let first = engine.next_id().unwrap();

    let err = engine.next_id().unwrap_err();
    assert_eq!(
        err,
        Error::ClockMovedBackwards {
            name: "binary".into(),
            delta: 5
        }
    );

    let next = engine.next_id().unwrap();
    assert_eq!(next, first + 1);
}

#[test]
fn ticks_before_epoch_are_refused() {
    let engine = binary(10, 12, 1, ScriptedTime::new([1_000, 1_001, EPOCH_MS - 1, NOW_MS]));

    for tick in [1_000, 1_001, EPOCH_MS - 1] {
        assert_eq!(
            engine.next_id().unwrap_err(),
            Error::ClockBeforeEpoch {
                name: "binary".into(),
                tick,
                epoch: EPOCH_MS
            }
        );
    }

    // Nothing was recorded, so the first valid tick starts a fresh sequence.
    let id = engine.next_id().unwrap();
    assert_eq!(engine.decompose(id), (NOW_MS, 1, 0));
}

#[test]
fn epoch_tick_itself_is_valid() {
    let engine = binary(10, 12, 1, FixedTime(EPOCH_MS));
    assert_eq!(engine.next_id().unwrap(), 1 << 12);
}

#[test]
fn tick_overflowing_the_layout_is_refused() {
    // 41 bits of ticks past the epoch no longer fit below the sign bit.
    let too_late = EPOCH_MS + (1 << 41);
    let engine = binary(10, 12, 0, ScriptedTime::new([too_late, NOW_MS]));
    assert!(matches!(
        engine.next_id(),
        Err(Error::Configuration { .. })
    ));
    let id = engine.next_id().unwrap();
    assert_eq!(engine.decompose(id), (NOW_MS, 0, 0));

    let last_fitting = EPOCH_MS + (1 << 41) - 1;
    let engine = binary(10, 12, 1023, FixedTime(last_fitting));
    assert_eq!(engine.next_id().unwrap(), i64::MAX - 4095);

    // yyMMddHHmmss for 2099-12-31 23:59:59 times 10^7 exceeds i64::MAX.
    let engine = ClockEngine::new(
        "decimal",
        Layout::Decimal,
        3,
        4,
        0,
        ScriptedTime::new([991_231_235_959, 170_424_191_230]),
    )
    .unwrap();
    assert!(matches!(
        engine.next_id(),
        Err(Error::Configuration { .. })
    ));
    assert_eq!(engine.next_id().unwrap(), 1_704_241_912_300_000_000);
}

#[test]
fn width_sums_are_validated() {
    assert!(ClockEngine::snowflake("ok", 10, 12, 0).is_ok());
    let err = ClockEngine::snowflake("bad", 10, 11, 0).unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));

    assert!(ClockEngine::ticktock("ok", 3, 4, 0).is_ok());
    let err = ClockEngine::ticktock("bad", 3, 3, 0).unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[test]
fn worker_id_must_fit_its_field() {
    assert!(ClockEngine::snowflake("edge", 10, 12, 1023).is_ok());
    let err = ClockEngine::snowflake("over", 10, 12, 1024).unwrap_err();
    assert!(matches!(err, Error::WorkerIdResolution { .. }));

    assert!(ClockEngine::ticktock("edge", 3, 4, 999).is_ok());
    let err = ClockEngine::ticktock("over", 3, 4, 1000).unwrap_err();
    assert!(matches!(err, Error::WorkerIdResolution { .. }));
}

#[test]
fn snowflake_ids_decode_worker_id() {
    let engine = ClockEngine::snowflake("decode", 10, 12, 513).unwrap();
    for _ in 0..1_000 {
        let id = engine.next_id().unwrap();
        assert_eq!(engine.decompose(id).1, 513);
    }
}

fn assert_unique_and_increasing_per_thread<T: TimeSource>(engine: &ClockEngine<T>, threads: usize, per_thread: usize) {
    let seen = Mutex::new(HashSet::with_capacity(threads * per_thread));
    scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                let mut last = i64::MIN;
                let mut local = Vec::with_capacity(per_thread);
                for _ in 0..per_thread {
                    let id = engine.next_id().unwrap();
                    assert!(id > last, "id {id} not greater than {last}");
                    last = id;
                    local.push(id);
                }
                let mut seen = seen.lock();
                for id in local {
                    assert!(seen.insert(id), "duplicate id {id}");
                }
            });
        }
    });
    assert_eq!(seen.lock().len(), threads * per_thread);
}

#[test]
fn snowflake_is_unique_across_threads() {
    let engine = ClockEngine::snowflake("threads", 10, 12, 7).unwrap();
    assert_unique_and_increasing_per_thread(&engine, 4, 10_000);
}

#[test]
#[ignore = "stress: ten million ids, run with --ignored"]
fn snowflake_is_unique_across_threads_ten_million() {
    let engine = ClockEngine::snowflake("stress", 10, 12, 7).unwrap();
    assert_unique_and_increasing_per_thread(&engine, 8, 1_250_000);
}

#[test]
fn ticktock_is_unique_across_threads() {
    let engine = ClockEngine::ticktock("threads", 3, 4, 7).unwrap();
    assert_unique_and_increasing_per_thread(&engine, 2, 2_000);
}

fn spawner() -> Arc<dyn Spawn> {
    Arc::new(ThreadSpawner::default())
}

fn breadcrumb(coord: &Arc<MemoryCoordinator>, name: &str, settings: CounterSettings) -> BreadcrumbEngine {
    BreadcrumbEngine::new(name, coord.clone(), settings, spawner(), BufferConfig::default()).unwrap()
}

#[test]
fn uncached_breadcrumb_is_unique_across_threads() {
    const THREADS: usize = 4;
    const CALLS: usize = 250;
    const START: i64 = 1_000;

    let coord = Arc::new(MemoryCoordinator::new());
    let engine = breadcrumb(
        &coord,
        "uncached",
        CounterSettings {
            start: START,
            ..CounterSettings::default()
        },
    );
    let seen = Mutex::new(HashSet::new());

    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..CALLS {
                    let id = engine.next_id().unwrap();
                    assert!(id >= START);
                    assert!(seen.lock().insert(id), "duplicate id {id}");
                }
            });
        }
    });

    let seen = seen.into_inner();
    assert_eq!(seen.len(), THREADS * CALLS);
    assert_eq!(seen.iter().min(), Some(&START));
}

#[test]
fn cached_breadcrumb_successes_are_distinct() {
    const THREADS: usize = 4;
    const CALLS: usize = 5_000;

    let coord = Arc::new(MemoryCoordinator::new());
    let engine = breadcrumb(
        &coord,
        "cached",
        CounterSettings {
            cache: 100,
            ..CounterSettings::default()
        },
    );
    let successes = Mutex::new(0_usize);
    let seen = Mutex::new(HashSet::new());

    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let mut local = Vec::new();
                for _ in 0..CALLS {
                    match engine.next_id() {
                        Ok(id) => local.push(id),
                        Err(err) => assert!(err.is_transient(), "unexpected error {err}"),
                    }
                }
                *successes.lock() += local.len();
                seen.lock().extend(local);
            });
        }
    });

    assert_eq!(*successes.lock(), seen.lock().len());
}

#[test]
fn adjust_cache_mid_stream_keeps_ids_unique() {
    let coord = Arc::new(MemoryCoordinator::new());
    let engine = breadcrumb(
        &coord,
        "resized",
        CounterSettings {
            cache: 50,
            increment: 3,
            start: 0,
        },
    );
    let successes = Mutex::new(0_usize);
    let seen = Mutex::new(HashSet::new());

    scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                let mut local = Vec::new();
                for _ in 0..3_000 {
                    if let Ok(id) = engine.next_id() {
                        local.push(id);
                    }
                }
                *successes.lock() += local.len();
                seen.lock().extend(local);
            });
        }
        s.spawn(|| {
            for size in [200, 20, 75] {
                std::thread::sleep(Duration::from_millis(5));
                engine.adjust_cache(size).unwrap();
            }
        });
    });

    let seen = seen.into_inner();
    assert_eq!(*successes.lock(), seen.len());
    assert!(seen.iter().all(|id| id % 3 == 0));
}

#[test]
fn adjust_cache_on_uncached_turns_buffer_on() {
    let coord = Arc::new(MemoryCoordinator::new());
    let engine = breadcrumb(&coord, "lazy", CounterSettings::default());
    assert!(!engine.is_cached());
    assert_eq!(engine.next_id().unwrap(), 0);

    engine.adjust_cache(10).unwrap();
    assert!(engine.is_cached());
    assert_eq!(engine.buffer().unwrap().capacity(), 10);
    assert_eq!(engine.next_id().unwrap(), 1);

    assert!(matches!(engine.adjust_cache(0), Err(Error::Configuration { .. })));
}

#[test]
fn reset_uncached_restarts_exactly() {
    let coord = Arc::new(MemoryCoordinator::new());
    let engine = breadcrumb(&coord, "reset", CounterSettings::default());
    engine.next_id().unwrap();
    engine.next_id().unwrap();

    engine.reset(500).unwrap();
    assert_eq!(engine.next_id().unwrap(), 500);
    assert_eq!(engine.next_id().unwrap(), 501);
}

#[test]
fn reset_cached_restarts_from_new_start() {
    let coord = Arc::new(MemoryCoordinator::new());
    let engine = breadcrumb(
        &coord,
        "reset-cached",
        CounterSettings {
            cache: 10,
            ..CounterSettings::default()
        },
    );
    assert_eq!(engine.next_id().unwrap(), 0);

    engine.reset(7_000).unwrap();
    assert_eq!(engine.next_id().unwrap(), 7_000);
}

#[test]
fn existing_counter_value_is_kept() {
    let coord = Arc::new(MemoryCoordinator::new());
    let first = breadcrumb(
        &coord,
        "shared",
        CounterSettings {
            start: 10,
            ..CounterSettings::default()
        },
    );
    assert_eq!(first.next_id().unwrap(), 10);

    let second = breadcrumb(
        &coord,
        "shared",
        CounterSettings {
            start: 0,
            ..CounterSettings::default()
        },
    );
    assert_eq!(second.next_id().unwrap(), 11);
    assert_eq!(first.next_id().unwrap(), 12);
}

#[test]
fn breadcrumb_requires_connection_and_increment() {
    let coord = Arc::new(MemoryCoordinator::new());
    let err = BreadcrumbEngine::new(
        "zero",
        coord.clone(),
        CounterSettings {
            increment: 0,
            ..CounterSettings::default()
        },
        spawner(),
        BufferConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));

    coord.set_connected(false);
    let err = BreadcrumbEngine::new(
        "offline",
        coord.clone(),
        CounterSettings::default(),
        spawner(),
        BufferConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::CoordinationUnavailable { .. }));
    assert!(!coord.exists("/sequences/offline").unwrap_or(false));
}

#[test]
fn partition_fails_calls_instead_of_guessing() {
    let coord = Arc::new(MemoryCoordinator::new());
    let engine = breadcrumb(&coord, "partitioned", CounterSettings::default());
    assert_eq!(engine.next_id().unwrap(), 0);

    coord.set_connected(false);
    assert!(matches!(
        engine.next_id(),
        Err(Error::CoordinationUnavailable { .. })
    ));

    coord.set_connected(true);
    assert_eq!(engine.next_id().unwrap(), 1);
}
