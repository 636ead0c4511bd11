use std::time::{SystemTime, UNIX_EPOCH};

use portable_atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU64, Ordering};

use crate::{
    error::{ConfigError, Error},
    id::{MAX_NODE_ID, MAX_TIMESTAMP, NODE_ID_BITS},
    time::{DEFAULT_EPOCH, to_unix_millis},
};

/// Number of pre-computed identifiers the pipeline keeps queued by default.
pub const DEFAULT_CAPACITY: usize = 200;

/// Worker width used by [`IdPipeline::set_datacenter_worker`]: 5 bits of
/// datacenter, 5 bits of worker.
///
/// [`IdPipeline::set_datacenter_worker`]: crate::IdPipeline::set_datacenter_worker
pub const DEFAULT_WORKER_BITS: u8 = 5;

/// How the producer advances the timestamp field.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClockMode {
    /// The tick is seeded from real time and then advances by exactly one
    /// every time the sequence is exhausted, however much real time passed.
    ///
    /// Under sustained demand the embedded timestamp runs ahead of the wall
    /// clock; under light demand it falls behind. Reconfiguration re-seeds
    /// the tick to `max(tick, now)`.
    #[default]
    Virtual,

    /// The real clock is sampled on every iteration. Exhausting the sequence
    /// within one millisecond makes the producer wait for the next one, so
    /// the embedded timestamp never runs ahead of real time.
    Wall,
}

/// Static configuration for an [`IdPipeline`].
///
/// [`IdPipeline`]: crate::IdPipeline
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Reference instant all timestamp offsets are measured from.
    pub start_epoch: SystemTime,
    /// Node identity placed in every id (`0..=1023`).
    pub node_id: u16,
    /// Bounded queue size.
    pub capacity: usize,
    pub clock_mode: ClockMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start_epoch: UNIX_EPOCH + DEFAULT_EPOCH,
            node_id: 0,
            capacity: DEFAULT_CAPACITY,
            clock_mode: ClockMode::Virtual,
        }
    }
}

impl PipelineConfig {
    /// Checks every field against the current time `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns the first rule the configuration breaks.
    pub fn validate(&self, now_ms: i64) -> Result<(), ConfigError> {
        validate_start_epoch(self.start_epoch, now_ms)?;
        validate_node_id(u64::from(self.node_id))?;
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(())
    }
}

/// Supplies a node identity at configuration time.
///
/// Returning `None` means no identity could be determined; the pipeline then
/// falls back to node `0`, which is fine for single-node deployments.
pub trait NodeIdProvider {
    fn node_id(&self) -> Option<u16>;
}

/// A [`NodeIdProvider`] that always returns the same value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedNodeId(pub u16);

impl NodeIdProvider for FixedNodeId {
    fn node_id(&self) -> Option<u16> {
        Some(self.0)
    }
}

impl<F> NodeIdProvider for F
where
    F: Fn() -> Option<u16>,
{
    fn node_id(&self) -> Option<u16> {
        self()
    }
}

/// Builds a node identity from a datacenter and a worker sub-field:
/// `(datacenter << worker_bits) | worker`.
///
/// The result is not range checked here; [`IdPipeline::set_node_id`] rejects
/// anything above 1023.
///
/// # Errors
///
/// Returns [`ConfigError::WorkerBitsTooLarge`] if `worker_bits` exceeds the
/// 10-bit node field.
///
/// # Example
///
/// ```
/// use flakepipe::combine_datacenter_and_worker;
///
/// assert_eq!(combine_datacenter_and_worker(1, 1, 5), Ok(33));
/// assert_eq!(combine_datacenter_and_worker(2, 3, 8), Ok(515));
/// ```
///
/// [`IdPipeline::set_node_id`]: crate::IdPipeline::set_node_id
pub fn combine_datacenter_and_worker(
    datacenter: u8,
    worker: u8,
    worker_bits: u8,
) -> Result<u16, ConfigError> {
    if u32::from(worker_bits) > NODE_ID_BITS {
        return Err(ConfigError::WorkerBitsTooLarge { bits: worker_bits });
    }
    Ok((u16::from(datacenter) << worker_bits) | u16::from(worker))
}

/// Checks a start epoch against the current time `now_ms`.
///
/// Only `UNIX_EPOCH` itself counts as the zero instant. Anything else is kept
/// at millisecond precision, so an epoch less than a millisecond away from
/// `UNIX_EPOCH` is accepted and stored as `0` ms.
pub(crate) fn validate_start_epoch(
    start_epoch: SystemTime,
    now_ms: i64,
) -> Result<(), ConfigError> {
    if start_epoch == UNIX_EPOCH {
        return Err(ConfigError::ZeroTime);
    }
    let epoch_ms = to_unix_millis(start_epoch);
    if epoch_ms > now_ms {
        return Err(ConfigError::FutureTime);
    }
    if now_ms.abs_diff(epoch_ms) > MAX_TIMESTAMP {
        return Err(ConfigError::RangeExceeded);
    }
    Ok(())
}

pub(crate) fn validate_node_id(node_id: u64) -> Result<(), ConfigError> {
    if node_id > MAX_NODE_ID {
        return Err(ConfigError::NodeIdOutOfRange { node_id });
    }
    Ok(())
}

/// The live configuration shared between a pipeline handle and its producer.
///
/// Writers store a field and then bump `generation` with `Release`; the
/// producer loads `generation` with `Acquire` before re-reading the fields, so
/// an id tagged with a generation always carries that generation's values.
#[derive(Debug)]
pub(crate) struct SharedConfig {
    start_epoch_ms: AtomicI64,
    node_id: AtomicU16,
    generation: AtomicU64,
    exhausted: AtomicBool,
}

/// A consistent read of [`SharedConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub start_epoch_ms: i64,
    pub node_id: u16,
    pub generation: u64,
}

impl SharedConfig {
    pub(crate) fn new(start_epoch_ms: i64, node_id: u16) -> Self {
        Self {
            start_epoch_ms: AtomicI64::new(start_epoch_ms),
            node_id: AtomicU16::new(node_id),
            generation: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn start_epoch_ms(&self) -> i64 {
        self.start_epoch_ms.load(Ordering::Acquire)
    }

    pub(crate) fn node_id(&self) -> u16 {
        self.node_id.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let generation = self.generation();
        Snapshot {
            start_epoch_ms: self.start_epoch_ms(),
            node_id: self.node_id(),
            generation,
        }
    }

    /// Records that the producer stopped because the timestamp field ran out.
    pub(crate) fn mark_exhausted(&self) {
        self.exhausted.store(true, Ordering::Release);
    }

    /// The error to report once the queue has closed.
    pub(crate) fn stop_error(&self) -> Error {
        if self.exhausted.load(Ordering::Acquire) {
            Error::TimestampExhausted
        } else {
            Error::ProducerStopped
        }
    }

    /// Stores a new start epoch and returns the generation that carries it.
    pub(crate) fn publish_start_epoch(&self, start_epoch_ms: i64) -> u64 {
        self.start_epoch_ms.store(start_epoch_ms, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Stores a new node identity and returns the generation that carries it.
    pub(crate) fn publish_node_id(&self, node_id: u16) -> u64 {
        self.node_id.store(node_id, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::from_unix_millis;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;
    const YEAR_MS: i64 = 365 * 24 * 60 * 60 * 1_000;

    #[test]
    fn combine_matches_known_values() {
        assert_eq!(combine_datacenter_and_worker(1, 1, 5), Ok(33));
        assert_eq!(combine_datacenter_and_worker(2, 3, 8), Ok(515));
        assert_eq!(combine_datacenter_and_worker(1, 255, 8), Ok(511));
        assert_eq!(combine_datacenter_and_worker(0, 7, 10), Ok(7));
    }

    #[test]
    fn combine_rejects_oversized_worker_field() {
        assert_eq!(
            combine_datacenter_and_worker(1, 1, 11),
            Err(ConfigError::WorkerBitsTooLarge { bits: 11 })
        );
    }

    fn at(ms: i64) -> SystemTime {
        from_unix_millis(ms)
    }

    #[test]
    fn start_epoch_rules() {
        assert_eq!(
            validate_start_epoch(UNIX_EPOCH, NOW),
            Err(ConfigError::ZeroTime)
        );
        assert_eq!(
            validate_start_epoch(at(NOW + 1), NOW),
            Err(ConfigError::FutureTime)
        );
        assert_eq!(
            validate_start_epoch(at(NOW - 70 * YEAR_MS), NOW),
            Err(ConfigError::RangeExceeded)
        );
        assert_eq!(
            validate_start_epoch(at(NOW - MAX_TIMESTAMP as i64), NOW),
            Ok(())
        );
        assert_eq!(
            validate_start_epoch(at(NOW - MAX_TIMESTAMP as i64 - 1), NOW),
            Err(ConfigError::RangeExceeded)
        );
        assert_eq!(validate_start_epoch(at(NOW), NOW), Ok(()));
        assert_eq!(
            validate_start_epoch(UNIX_EPOCH + DEFAULT_EPOCH, NOW),
            Ok(())
        );
    }

    #[test]
    fn sub_millisecond_epochs_are_not_zero_time() {
        let just_after = UNIX_EPOCH + Duration::from_micros(500);
        let just_before = UNIX_EPOCH - Duration::from_micros(500);
        assert_eq!(validate_start_epoch(just_after, NOW), Ok(()));
        assert_eq!(validate_start_epoch(just_before, NOW), Ok(()));
        assert_eq!(to_unix_millis(just_after), 0);
    }

    #[test]
    fn node_id_rules() {
        assert_eq!(validate_node_id(1023), Ok(()));
        assert_eq!(
            validate_node_id(1024),
            Err(ConfigError::NodeIdOutOfRange { node_id: 1024 })
        );
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(PipelineConfig::default().validate(NOW), Ok(()));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = PipelineConfig {
            capacity: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(config.validate(NOW), Err(ConfigError::InvalidCapacity));
    }

    #[test]
    fn providers() {
        assert_eq!(FixedNodeId(9).node_id(), Some(9));
        let unavailable = || None::<u16>;
        assert_eq!(unavailable.node_id(), None);
    }

    #[test]
    fn stop_error_reports_exhaustion() {
        let shared = SharedConfig::new(1, 2);
        assert_eq!(shared.stop_error(), Error::ProducerStopped);
        shared.mark_exhausted();
        assert_eq!(shared.stop_error(), Error::TimestampExhausted);
    }

    #[test]
    fn publish_bumps_generation() {
        let shared = SharedConfig::new(1, 2);
        assert_eq!(shared.generation(), 0);
        assert_eq!(shared.publish_node_id(5), 1);
        assert_eq!(shared.publish_start_epoch(10), 2);
        assert_eq!(
            shared.snapshot(),
            Snapshot {
                start_epoch_ms: 10,
                node_id: 5,
                generation: 2
            }
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_serde_round_trip() {
        let config = PipelineConfig {
            node_id: 17,
            clock_mode: ClockMode::Wall,
            ..PipelineConfig::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let back: PipelineConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, back);
    }
}
