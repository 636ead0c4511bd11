//! Error types for pipeline configuration and reconfiguration.
//!
//! Only configuration can fail. Packing, decoding and handing out ids have no
//! error path. Every fallible operation validates before it commits, so an
//! `Err` always leaves the previous configuration in place.

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Rejected configuration input.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConfigError {
    /// The start epoch was the zero instant (the UNIX epoch itself).
    #[error("invalid start epoch: zero time")]
    ZeroTime,

    /// The start epoch lies after the current time.
    #[error("invalid start epoch: future time")]
    FutureTime,

    /// The start epoch is further in the past than the timestamp field can
    /// represent.
    #[error("invalid start epoch: range exceeded (more than 2^41 - 1 ms ago)")]
    RangeExceeded,

    /// The node identity does not fit in the 10-bit field.
    #[error("node id {node_id} out of range (max 1023)")]
    NodeIdOutOfRange { node_id: u64 },

    /// A datacenter/worker split asked for more bits than the node field has.
    #[error("workerBits too large: {bits} (max 10)")]
    WorkerBitsTooLarge { bits: u8 },

    /// The queue must hold at least one identifier.
    #[error("queue capacity must be greater than zero")]
    InvalidCapacity,
}

/// All errors `flakepipe` can produce.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration input; nothing was changed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The producer thread is no longer running.
    ///
    /// Only reachable if a user-supplied sequence resolver panicked on the
    /// producer thread.
    #[error("id producer stopped")]
    ProducerStopped,

    /// The timestamp offset outgrew its 41-bit field and the producer shut
    /// down rather than wrap into the reserved bit.
    ///
    /// Ids queued before the shutdown are still handed out; this is returned
    /// once they are gone.
    #[error("timestamp range exhausted: offset exceeds 2^41 - 1 ms from the start epoch")]
    TimestampExhausted,

    /// The producer thread could not be started.
    #[error("failed to spawn id producer: {reason}")]
    ProducerSpawn { reason: String },
}
