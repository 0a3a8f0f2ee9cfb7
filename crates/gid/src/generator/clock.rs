use crate::error::{Error, Result};
use crate::time::{DecimalClock, SNOWFLAKE_EPOCH, TimeSource, WallClock};
use core::cmp::Ordering;
use core::time::Duration;
use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Total width of the worker and sequence fields in the binary layout.
pub const BINARY_FIELD_BITS: u8 = 22;

/// Total digits of the worker and sequence fields in the decimal layout.
pub const DECIMAL_FIELD_DIGITS: u8 = 7;

/// How the tick, worker id and in-tick sequence are packed into one integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// `(tick - epoch) << (w + s) | worker << s | sequence`, field widths in
    /// bits.
    Binary,
    /// `tick * 10^(w + s) + worker * 10^s + sequence`, field widths in
    /// decimal digits.
    Decimal,
}

impl Layout {
    /// Required sum of the worker and sequence widths.
    pub const fn field_width(self) -> u8 {
        match self {
            Self::Binary => BINARY_FIELD_BITS,
            Self::Decimal => DECIMAL_FIELD_DIGITS,
        }
    }

    /// Largest value a field of `width` bits or digits can hold.
    pub const fn max_value(self, width: u8) -> u64 {
        match self {
            Self::Binary => (1 << width) - 1,
            Self::Decimal => 10_u64.pow(width as u32) - 1,
        }
    }

    /// Multiplier that moves a value past a field of `width` bits or digits.
    const fn radix(self, width: u8) -> u64 {
        match self {
            Self::Binary => 1 << width,
            Self::Decimal => 10_u64.pow(width as u32),
        }
    }
}

/// Tuning for the wait that follows an in-tick sequence overflow.
///
/// The wait first polls the clock in a tight loop, yielding every
/// `yield_every` polls, then falls back to sleeps that start at
/// `initial_backoff` and double up to `max_backoff`. Either way the waiting
/// caller holds the engine lock, so every other caller of the same engine
/// waits as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpinConfig {
    pub spin_loops: u32,
    pub yield_every: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SpinConfig {
    fn default() -> Self {
        Self {
            spin_loops: 10_000,
            yield_every: 64,
            initial_backoff: Duration::from_micros(100),
            max_backoff: Duration::from_millis(100),
        }
    }
}

impl SpinConfig {
    /// Polls `time` until it reports a tick past `last`.
    fn wait_past(&self, last: u64, time: &impl TimeSource) -> u64 {
        for i in 0..self.spin_loops {
            let now = time.current_tick();
            if now > last {
                return now;
            }
            core::hint::spin_loop();
            if self.yield_every != 0 && i % self.yield_every == self.yield_every - 1 {
                std::thread::yield_now();
            }
        }

        let mut backoff = self.initial_backoff;
        loop {
            let now = time.current_tick();
            if now > last {
                return now;
            }
            std::thread::sleep(backoff);
            backoff = backoff.saturating_mul(2).min(self.max_backoff);
        }
    }
}

#[derive(Debug)]
struct ClockState {
    last_tick: Option<u64>,
    sequence: u64,
}

/// A clock-driven identifier engine.
///
/// Every id is derived from the current tick of `T`, a fixed worker id and a
/// per-tick sequence, all under a single mutex:
///
/// - tick behind the last issued one: [`Error::ClockMovedBackwards`], state
///   untouched;
/// - same tick: bump the sequence; on overflow wait for the next tick and
///   restart the sequence at `0`;
/// - later tick: restart the sequence at `0`.
///
/// A binary-layout tick before [`SNOWFLAKE_EPOCH`] is refused with
/// [`Error::ClockBeforeEpoch`]; no id is issued and the state is untouched.
///
/// Ids from one engine are therefore strictly increasing across all callers.
///
/// ## Variants
/// - [`ClockEngine::snowflake`]: millisecond [`WallClock`], [`Layout::Binary`]
///   with 22 bits shared between worker and sequence.
/// - [`ClockEngine::ticktock`]: `yyMMddHHmmss` [`DecimalClock`],
///   [`Layout::Decimal`] with 7 digits shared between worker and sequence.
///
/// # Example
/// ```
/// use gid::generator::ClockEngine;
///
/// let engine = ClockEngine::snowflake("order", 10, 12, 7).unwrap();
/// let a = engine.next_id().unwrap();
/// let b = engine.next_id().unwrap();
/// assert!(b > a);
/// assert_eq!(engine.decompose(b).1, 7);
/// ```
#[derive(Debug)]
pub struct ClockEngine<T = WallClock>
where
    T: TimeSource,
{
    name: String,
    layout: Layout,
    worker_id: u64,
    worker_id_bits: u8,
    sequence_bits: u8,
    sequence_max: u64,
    spin: SpinConfig,
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<Mutex<ClockState>>,
    #[cfg(not(feature = "cache-padded"))]
    state: Mutex<ClockState>,
    time: T,
}

impl ClockEngine<WallClock> {
    /// A binary-layout engine on the millisecond wall clock.
    ///
    /// # Errors
    /// - [`Error::Configuration`] unless `worker_id_bits + sequence_bits == 22`.
    /// - [`Error::WorkerIdResolution`] if `worker_id` does not fit.
    pub fn snowflake(
        name: &str,
        worker_id_bits: u8,
        sequence_bits: u8,
        worker_id: u64,
    ) -> Result<Self> {
        Self::new(name, Layout::Binary, worker_id_bits, sequence_bits, worker_id, WallClock)
    }
}

impl ClockEngine<DecimalClock> {
    /// A decimal-layout engine on the `yyMMddHHmmss` local clock.
    ///
    /// # Errors
    /// - [`Error::Configuration`] unless `worker_id_bits + sequence_bits == 7`.
    /// - [`Error::WorkerIdResolution`] if `worker_id` does not fit.
    pub fn ticktock(
        name: &str,
        worker_id_bits: u8,
        sequence_bits: u8,
        worker_id: u64,
    ) -> Result<Self> {
        Self::new(name, Layout::Decimal, worker_id_bits, sequence_bits, worker_id, DecimalClock)
    }
}

impl<T> ClockEngine<T>
where
    T: TimeSource,
{
    /// Creates an engine with an arbitrary time source.
    pub fn new(
        name: &str,
        layout: Layout,
        worker_id_bits: u8,
        sequence_bits: u8,
        worker_id: u64,
        time: T,
    ) -> Result<Self> {
        validate_widths(name, layout, worker_id_bits, sequence_bits)?;
        let max_worker_id = layout.max_value(worker_id_bits);
        if worker_id > max_worker_id {
            return Err(Error::WorkerIdResolution {
                name: name.to_owned(),
                reason: format!("worker id {worker_id} can't be greater than {max_worker_id}"),
            });
        }

        let state = Mutex::new(ClockState {
            last_tick: None,
            sequence: 0,
        });
        #[cfg(feature = "cache-padded")]
        let state = crossbeam_utils::CachePadded::new(state);

        #[cfg(feature = "tracing")]
        tracing::info!(
            sequence = name,
            ?layout,
            worker_id,
            worker_id_bits,
            sequence_bits,
            "clock engine ready"
        );

        Ok(Self {
            name: name.to_owned(),
            layout,
            worker_id,
            worker_id_bits,
            sequence_bits,
            sequence_max: layout.max_value(sequence_bits),
            spin: SpinConfig::default(),
            state,
            time,
        })
    }

    #[must_use]
    pub const fn with_spin(mut self, spin: SpinConfig) -> Self {
        self.spin = spin;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn layout(&self) -> Layout {
        self.layout
    }

    pub const fn worker_id(&self) -> u64 {
        self.worker_id
    }

    pub const fn worker_id_bits(&self) -> u8 {
        self.worker_id_bits
    }

    pub const fn sequence_bits(&self) -> u8 {
        self.sequence_bits
    }

    /// Returns the next identifier.
    ///
    /// Blocks (spinning, then sleeping) while the current tick's sequence is
    /// used up.
    ///
    /// # Errors
    /// - [`Error::ClockMovedBackwards`] if the clock reports a tick earlier than
    ///   the last one used.
    /// - [`Error::ClockBeforeEpoch`] if a binary-layout clock reads earlier
    ///   than the epoch, e.g. a host booted with a reset clock.
    /// - [`Error::Configuration`] if the tick no longer fits in a signed 64-bit
    ///   id.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self), fields(sequence = %self.name)))]
    pub fn next_id(&self) -> Result<i64> {
        let mut state = self.state.lock();
        let mut now = self.time.current_tick();

        let sequence = match state.last_tick.map(|last| now.cmp(&last)) {
            Some(Ordering::Less) => {
                let last = state.last_tick.unwrap_or(now);
                return Err(self.cold_clock_behind(now, last));
            }
            Some(Ordering::Equal) => match self.bump(state.sequence) {
                Some(next) => next,
                None => {
                    now = self.spin.wait_past(now, &self.time);
                    0
                }
            },
            Some(Ordering::Greater) | None => 0,
        };

        // State only advances once the id is known to fit.
        let id = self.assemble(now, sequence)?;
        state.last_tick = Some(now);
        state.sequence = sequence;
        Ok(id)
    }

    /// Splits an id from this engine into `(tick, worker_id, sequence)`.
    ///
    /// For the binary layout the tick is in epoch milliseconds, i.e. the
    /// engine epoch is added back.
    pub fn decompose(&self, id: i64) -> (u64, u64, u64) {
        let id = id as u64;
        let sequence_radix = self.layout.radix(self.sequence_bits);
        let worker_radix = self.layout.radix(self.worker_id_bits);
        let sequence = id % sequence_radix;
        let worker_id = (id / sequence_radix) % worker_radix;
        let tick = id / sequence_radix / worker_radix;
        match self.layout {
            Layout::Binary => (tick + SNOWFLAKE_EPOCH.as_millis() as u64, worker_id, sequence),
            Layout::Decimal => (tick, worker_id, sequence),
        }
    }

    fn bump(&self, sequence: u64) -> Option<u64> {
        match self.layout {
            Layout::Binary => {
                let next = (sequence + 1) & self.sequence_max;
                (next != 0).then_some(next)
            }
            Layout::Decimal => {
                let next = sequence + 1;
                (next <= self.sequence_max).then_some(next)
            }
        }
    }

    fn assemble(&self, now: u64, sequence: u64) -> Result<i64> {
        let tick = match self.layout {
            Layout::Binary => {
                let epoch = SNOWFLAKE_EPOCH.as_millis() as u64;
                now.checked_sub(epoch).ok_or_else(|| Error::ClockBeforeEpoch {
                    name: self.name.clone(),
                    tick: now,
                    epoch,
                })?
            }
            Layout::Decimal => now,
        };
        let sequence_radix = self.layout.radix(self.sequence_bits);
        let worker_radix = self.layout.radix(self.worker_id_bits);
        tick.checked_mul(worker_radix * sequence_radix)
            .and_then(|high| high.checked_add(self.worker_id * sequence_radix + sequence))
            .and_then(|id| i64::try_from(id).ok())
            .ok_or_else(|| Error::config(&self.name, format!("tick {now} overflows the id layout")))
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind(&self, now: u64, last: u64) -> Error {
        #[cfg(feature = "tracing")]
        tracing::error!(sequence = %self.name, now, last, "clock moved backwards");
        Error::ClockMovedBackwards {
            name: self.name.clone(),
            delta: last - now,
        }
    }
}

/// Checks that the worker and sequence widths fill the layout exactly.
pub(crate) fn validate_widths(
    name: &str,
    layout: Layout,
    worker_id_bits: u8,
    sequence_bits: u8,
) -> Result<()> {
    let expected = layout.field_width();
    if worker_id_bits.checked_add(sequence_bits) != Some(expected) {
        let unit = match layout {
            Layout::Binary => "bits",
            Layout::Decimal => "digits",
        };
        return Err(Error::config(
            name,
            format!(
                "worker id width ({worker_id_bits}) + sequence width ({sequence_bits}) must equal {expected} {unit}"
            ),
        ));
    }
    Ok(())
}
