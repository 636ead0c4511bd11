use core::cell::Cell;
use std::sync::Arc;

use portable_atomic::{AtomicU16, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::id::MAX_SEQUENCE;

const SEQUENCE_MASK: u16 = MAX_SEQUENCE as u16;

/// A strategy for handing out per-tick sequence numbers.
///
/// Implementations return values in `0..=4095` and are expected to count
/// upwards, wrapping back to zero after 4095. The producer treats any value
/// that is not greater than the previous one as "this tick is exhausted" and
/// moves on to the next tick. It then asks again with the new tick, so a
/// resolver that restarts per tick begins that tick at zero. A resolver
/// shared with other callers (and therefore skipping values) never causes
/// duplicate ids.
///
/// `tick_hint` is the tick the caller is currently filling. [`LocalResolver`]
/// restarts at zero whenever it changes; [`AtomicResolver`] ignores it and
/// free-runs across tick boundaries.
pub trait SequenceResolver {
    /// Returns the next sequence number.
    fn next_sequence(&self, tick_hint: i64) -> u16;
}

impl<R> SequenceResolver for Arc<R>
where
    R: SequenceResolver + ?Sized,
{
    fn next_sequence(&self, tick_hint: i64) -> u16 {
        (**self).next_sequence(tick_hint)
    }
}

/// The pipeline's default resolver: a plain counter owned by the producer.
///
/// ## Features
/// - ❌ Not thread-safe (`Send`, not `Sync`)
/// - ✅ No atomic traffic on the hot path
/// - ✅ Every new tick starts at sequence `0`, so a tick always holds the
///   full 4096 values
#[derive(Debug, Default)]
pub struct LocalResolver {
    tick: Cell<Option<i64>>,
    next: Cell<u16>,
}

impl LocalResolver {
    pub const fn new() -> Self {
        Self {
            tick: Cell::new(None),
            next: Cell::new(0),
        }
    }
}

impl SequenceResolver for LocalResolver {
    fn next_sequence(&self, tick_hint: i64) -> u16 {
        let seq = if self.tick.get() == Some(tick_hint) {
            self.next.get()
        } else {
            self.tick.set(Some(tick_hint));
            0
        };
        self.next.set((seq + 1) & SEQUENCE_MASK);
        seq
    }
}

/// A lock-free sequence counter suitable for multi-threaded callers.
///
/// Each call atomically advances a shared counter modulo 4096 using a
/// compare-and-swap retry loop and returns the value it claimed. Any `4096`
/// consecutive successful calls, from any mix of threads, return every value
/// in `0..=4095` exactly once.
///
/// ## Features
/// - ✅ Thread-safe
/// - ✅ Never blocks; retries only while another thread wins the CAS
///
/// ## Recommended When
/// - You are assembling your own identifier scheme and need a shared
///   sequence source
/// - You want several pipelines or callers to draw from one counter
///
/// The counter does not reset when `tick_hint` changes.
#[derive(Debug, Default)]
pub struct AtomicResolver {
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<AtomicU16>,
    #[cfg(not(feature = "cache-padded"))]
    state: AtomicU16,
}

impl AtomicResolver {
    pub const fn new() -> Self {
        Self {
            #[cfg(feature = "cache-padded")]
            state: crossbeam_utils::CachePadded::new(AtomicU16::new(0)),
            #[cfg(not(feature = "cache-padded"))]
            state: AtomicU16::new(0),
        }
    }

    /// Claims the next sequence value.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn next_sequence(&self, _tick_hint: i64) -> u16 {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let candidate = (current + 1) & SEQUENCE_MASK;
            match self.state.compare_exchange_weak(
                current,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                // Another thread won the race; retry from what it stored.
                Err(actual) => current = actual,
            }
        }
    }
}

impl SequenceResolver for AtomicResolver {
    fn next_sequence(&self, tick_hint: i64) -> u16 {
        self.next_sequence(tick_hint)
    }
}

static STANDALONE: AtomicResolver = AtomicResolver::new();

/// Claims the next value from the process-wide [`AtomicResolver`].
///
/// This counter is independent of every [`IdPipeline`]; it exists for callers
/// building their own identifier layout.
///
/// [`IdPipeline`]: crate::IdPipeline
pub fn next_standalone_sequence(tick_hint: i64) -> u16 {
    STANDALONE.next_sequence(tick_hint)
}
