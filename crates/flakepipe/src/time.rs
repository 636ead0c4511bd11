use core::time::Duration;
use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

/// Default start epoch: Monday, November 10, 2008 23:00:00 UTC
pub const DEFAULT_EPOCH: Duration = Duration::from_millis(1_226_358_000_000);

/// Twitter epoch: Thursday, November 4, 2010 1:42:54.657 UTC
pub const TWITTER_EPOCH: Duration = Duration::from_millis(1_288_834_974_657);

/// Discord epoch: Thursday, January 1, 2015 00:00:00 UTC
pub const DISCORD_EPOCH: Duration = Duration::from_millis(1_420_070_400_000);

/// A source of the current time, in milliseconds since the UNIX epoch.
///
/// This abstraction allows you to plug in the system clock, a monotonic
/// ticker, or a mocked time source in tests.
///
/// # Example
///
/// ```
/// use flakepipe::TimeSource;
///
/// #[derive(Clone)]
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since 1970-01-01 UTC.
    fn current_millis(&self) -> u64;
}

/// Reads `SystemTime::now()` on every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    /// # Panics
    ///
    /// Panics if the system clock reports a time before the UNIX epoch.
    fn current_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System clock before UNIX_EPOCH")
            .as_millis() as u64
    }
}

/// Converts an instant to signed milliseconds since the UNIX epoch.
///
/// Instants before 1970 yield negative values.
pub fn to_unix_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_millis()).map_or(i64::MIN, |ms| -ms),
    }
}

/// Inverse of [`to_unix_millis`].
pub fn from_unix_millis(ms: i64) -> SystemTime {
    let magnitude = Duration::from_millis(ms.unsigned_abs());
    if ms >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

/// Shared ticker thread that updates every millisecond.
#[derive(Debug)]
struct SharedTickerInner {
    current: AtomicU64,
    _handle: OnceLock<JoinHandle<()>>,
}

/// A monotonic time source anchored to the wall clock once, at construction.
///
/// This avoids wall-clock adjustments (e.g., NTP corrections) moving time
/// backwards while still reporting UNIX milliseconds.
///
/// A background thread stores the elapsed milliseconds into a shared atomic
/// once per millisecond; reads are a single atomic load. The thread exits once
/// every clone of the clock has been dropped.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    inner: Arc<SharedTickerInner>,
    unix_offset: u64, // in milliseconds
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Starts the ticker thread and anchors it to `SystemTime::now()`.
    ///
    /// # Panics
    ///
    /// Panics if the system clock reports a time before the UNIX epoch.
    pub fn new() -> Self {
        let start = Instant::now();
        let unix_offset = SystemClock.current_millis();

        let inner = Arc::new(SharedTickerInner {
            current: AtomicU64::new(0),
            _handle: OnceLock::new(),
        });

        let weak_inner = Arc::downgrade(&inner);
        let handle = thread::Builder::new()
            .name("flakepipe-clock".into())
            .spawn(move || {
                let mut tick = 0;

                loop {
                    let Some(inner_ref) = weak_inner.upgrade() else {
                        break;
                    };

                    // Absolute target time of the next tick
                    let target = start + Duration::from_millis(tick);

                    let now = Instant::now();
                    if now < target {
                        thread::sleep(target - now);
                    }

                    let now_ms = start.elapsed().as_millis() as u64;
                    inner_ref.current.store(now_ms, Ordering::Relaxed);

                    tick = now_ms + 1;
                }
            })
            .expect("failed to spawn clock thread");

        inner
            ._handle
            .set(handle)
            .expect("failed to set thread handle");

        Self { inner, unix_offset }
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        self.unix_offset + self.inner.current.load(Ordering::Relaxed)
    }
}
