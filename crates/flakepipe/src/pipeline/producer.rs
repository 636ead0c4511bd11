use core::convert::Infallible;
use std::{sync::Arc, thread, time::Duration};

use tokio::sync::mpsc;

use crate::{
    config::{ClockMode, SharedConfig, Snapshot},
    id::{MAX_TIMESTAMP, pack},
    resolver::SequenceResolver,
    time::TimeSource,
};

/// A finished identifier tagged with the configuration generation it was
/// computed under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Minted {
    pub generation: u64,
    pub id: u64,
}

/// The single writer of the pipeline queue.
///
/// Runs on its own thread until every receiver is gone or the timestamp
/// field runs out of range. Blocking on a full queue is the only pacing in
/// [`ClockMode::Virtual`].
pub(crate) struct Producer<T> {
    pub tx: mpsc::Sender<Minted>,
    pub shared: Arc<SharedConfig>,
    pub clock: T,
    pub clock_mode: ClockMode,
    pub resolver: Box<dyn SequenceResolver + Send>,
}

/// Why the producer loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stop {
    /// Every receiver is gone.
    Closed,
    /// The offset for `tick` no longer fits the timestamp field.
    Exhausted { tick: i64 },
}

impl<T> Producer<T>
where
    T: TimeSource,
{
    pub(crate) fn run(self) {
        let stop = match self.produce() {
            Ok(never) => match never {},
            Err(stop) => stop,
        };

        match stop {
            Stop::Closed => {
                #[cfg(feature = "tracing")]
                tracing::debug!("id producer stopped");
            }
            Stop::Exhausted { tick } => {
                // Set before `tx` drops so receivers see it once the queue closes.
                self.shared.mark_exhausted();
                #[cfg(feature = "tracing")]
                tracing::error!(
                    tick,
                    start_epoch_ms = self.shared.start_epoch_ms(),
                    "timestamp offset exceeds the 41-bit field, id producer stopped"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = tick;
            }
        }
    }

    fn produce(&self) -> Result<Infallible, Stop> {
        let mut config = self.shared.snapshot();
        let mut tick = self.now();
        let mut prefix = Self::prefix(tick, &config)?;
        let mut last_seq: Option<u16> = None;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            tick,
            node_id = config.node_id,
            mode = ?self.clock_mode,
            "id producer started"
        );

        loop {
            if self.shared.generation() != config.generation {
                config = self.shared.snapshot();
                // A later start epoch must never produce a negative offset.
                let now = self.now();
                if now > tick {
                    tick = now;
                    last_seq = None;
                }
                prefix = Self::prefix(tick, &config)?;

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    generation = config.generation,
                    node_id = config.node_id,
                    start_epoch_ms = config.start_epoch_ms,
                    "producer picked up new configuration"
                );
            }

            if self.clock_mode == ClockMode::Wall {
                let now = self.now();
                if now > tick {
                    tick = now;
                    last_seq = None;
                    prefix = Self::prefix(tick, &config)?;
                }
            }

            let mut seq = self.resolver.next_sequence(tick);
            if last_seq.is_some_and(|last| seq <= last) {
                // Sequence space for this tick is used up.
                tick = match self.clock_mode {
                    ClockMode::Virtual => tick + 1,
                    ClockMode::Wall => self.wait_past(tick)?,
                };
                prefix = Self::prefix(tick, &config)?;
                seq = self.resolver.next_sequence(tick);
            }
            last_seq = Some(seq);

            let minted = Minted {
                generation: config.generation,
                id: prefix | u64::from(seq),
            };
            if self.tx.blocking_send(minted).is_err() {
                return Err(Stop::Closed);
            }
        }
    }

    fn now(&self) -> i64 {
        self.clock.current_millis() as i64
    }

    /// Packs the timestamp and node fields for `tick`, refusing offsets the
    /// 41-bit field cannot hold.
    fn prefix(tick: i64, config: &Snapshot) -> Result<u64, Stop> {
        let offset = tick.saturating_sub(config.start_epoch_ms).max(0) as u64;
        if offset > MAX_TIMESTAMP {
            return Err(Stop::Exhausted { tick });
        }
        Ok(pack(offset, u64::from(config.node_id), 0))
    }

    /// Sleeps until the clock moves past `tick` and returns the new time.
    fn wait_past(&self, tick: i64) -> Result<i64, Stop> {
        loop {
            if self.tx.is_closed() {
                return Err(Stop::Closed);
            }
            let now = self.now();
            if now > tick {
                return Ok(now);
            }
            let yield_for = (tick - now + 1) as u64;
            thread::sleep(Duration::from_millis(yield_for));
        }
    }
}
