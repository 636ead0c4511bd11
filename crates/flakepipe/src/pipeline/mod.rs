//! The generation pipeline: one producer thread manufacturing identifiers
//! ahead of demand into a bounded queue, and any number of consumers pulling
//! them out in production order.
//!
//! ## Reconfiguration
//!
//! [`IdPipeline::set_start_epoch`] and [`IdPipeline::set_node_id`] take
//! `&mut self`, so they cannot run while other threads hold the pipeline.
//! After publishing the new value they run a drain barrier: queued ids that
//! were computed under the previous configuration are popped and discarded
//! until the first id carrying the new configuration shows up. The next id a
//! caller receives always reflects the change.
//!
//! Every blocking method here (`next_id`, the setters) must be called from a
//! synchronous context. Inside a tokio runtime use
//! [`IdPipeline::next_id_async`] (feature `async-tokio`) or wrap the call in
//! `spawn_blocking`.

mod producer;

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::SystemTime,
};

use tokio::sync::{Mutex, mpsc};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::{
        ClockMode, DEFAULT_WORKER_BITS, NodeIdProvider, PipelineConfig, SharedConfig,
        combine_datacenter_and_worker, validate_node_id, validate_start_epoch,
    },
    error::{Error, Result},
    id::Sid,
    resolver::{LocalResolver, SequenceResolver},
    time::{MonotonicClock, TimeSource, from_unix_millis, to_unix_millis},
};
use producer::{Minted, Producer};

/// A background Snowflake ID pipeline.
///
/// A dedicated producer thread packs `(timestamp, node id, sequence)` into
/// 64-bit identifiers and pushes them into a bounded queue; [`Self::next_id`]
/// pops one. Ids leave the queue in the order they were produced, and the
/// producer emits them in strictly increasing order, so any single consumer
/// sees strictly increasing values between reconfigurations.
///
/// ## Features
/// - ✅ Thread-safe consumers (`&self`)
/// - ✅ Backpressure: the producer blocks while the queue is full
/// - ✅ Reconfiguration enforced exclusive through `&mut self`
///
/// The producer thread stops when the pipeline is dropped.
///
/// # Example
///
/// ```
/// use flakepipe::{IdPipeline, Sid};
///
/// let mut pipeline = IdPipeline::builder().node_id(7).build()?;
/// let first = pipeline.next_id();
/// assert!(pipeline.next_id() > first);
///
/// pipeline.set_node_id(100)?;
/// assert_eq!(Sid::decode(pipeline.next_id()).node_id(), 100);
/// # Ok::<(), flakepipe::Error>(())
/// ```
pub struct IdPipeline<T = MonotonicClock>
where
    T: TimeSource,
{
    // Declared first so dropping the pipeline closes the queue before
    // anything else goes away; the producer exits on its next send.
    rx: Mutex<mpsc::Receiver<Minted>>,
    shared: Arc<SharedConfig>,
    clock: T,
    clock_mode: ClockMode,
    capacity: usize,
    _producer: JoinHandle<()>,
}

impl IdPipeline<MonotonicClock> {
    /// Starts a pipeline from a complete configuration, using a
    /// [`MonotonicClock`] for real time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails validation.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Returns a builder preloaded with [`PipelineConfig::default`] and a
    /// [`MonotonicClock`].
    pub fn builder() -> PipelineBuilder<MonotonicClock> {
        PipelineBuilder::with_clock(MonotonicClock::new())
    }
}

impl<T> IdPipeline<T>
where
    T: TimeSource,
{
    /// Pops the next identifier, blocking while the queue is empty.
    ///
    /// # Panics
    ///
    /// Panics if the producer thread has stopped: the timestamp field ran
    /// out of range or a custom [`SequenceResolver`] panicked. Also panics
    /// when called from within an async runtime; see [`Self::next_id_async`].
    pub fn next_id(&self) -> u64 {
        self.try_next_id().expect("id producer thread terminated")
    }

    /// A fallible version of [`Self::next_id`].
    ///
    /// # Errors
    ///
    /// - [`Error::TimestampExhausted`] once the timestamp offset has outgrown
    ///   its field and every id minted before that has been handed out
    /// - [`Error::ProducerStopped`] if the producer thread died
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn try_next_id(&self) -> Result<u64> {
        self.rx
            .blocking_lock()
            .blocking_recv()
            .map(|minted| minted.id)
            .ok_or_else(|| self.shared.stop_error())
    }

    /// Pops the next identifier without blocking the runtime thread.
    ///
    /// # Errors
    ///
    /// See [`Self::try_next_id`].
    #[cfg(feature = "async-tokio")]
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn next_id_async(&self) -> Result<u64> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .map(|minted| minted.id)
            .ok_or_else(|| self.shared.stop_error())
    }

    /// Decodes an identifier.
    pub fn decode(&self, id: u64) -> Sid {
        Sid::decode(id)
    }

    /// The instant `sid` claims to have been generated at, measured from
    /// this pipeline's current start epoch.
    pub fn generate_time(&self, sid: &Sid) -> SystemTime {
        sid.generate_time(self.start_epoch())
    }

    pub fn start_epoch(&self) -> SystemTime {
        from_unix_millis(self.shared.start_epoch_ms())
    }

    pub fn node_id(&self) -> u16 {
        self.shared.node_id()
    }

    pub fn clock_mode(&self) -> ClockMode {
        self.clock_mode
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the start epoch and flushes ids computed under the old one.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroTime`] if `start_epoch` is the UNIX epoch
    /// - [`ConfigError::FutureTime`] if it lies after the current time
    /// - [`ConfigError::RangeExceeded`] if it is more than `2^41 - 1` ms ago
    /// - [`Error::ProducerStopped`] or [`Error::TimestampExhausted`] if the
    ///   producer stopped while draining
    ///
    /// Nothing is changed when validation fails. Epochs are kept at
    /// millisecond precision.
    ///
    /// [`ConfigError::ZeroTime`]: crate::ConfigError::ZeroTime
    /// [`ConfigError::FutureTime`]: crate::ConfigError::FutureTime
    /// [`ConfigError::RangeExceeded`]: crate::ConfigError::RangeExceeded
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn set_start_epoch(&mut self, start_epoch: SystemTime) -> Result<()> {
        let epoch_ms = to_unix_millis(start_epoch);
        let now_ms = self.clock.current_millis() as i64;
        if let Err(e) = validate_start_epoch(start_epoch, now_ms) {
            #[cfg(feature = "tracing")]
            tracing::warn!(epoch_ms, now_ms, error = %e, "rejected start epoch");
            return Err(e.into());
        }

        let generation = self.shared.publish_start_epoch(epoch_ms);
        self.drain(generation)
    }

    /// Changes the node identity and flushes ids computed under the old one.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NodeIdOutOfRange`] if `node_id` exceeds 1023
    /// - [`Error::ProducerStopped`] or [`Error::TimestampExhausted`] if the
    ///   producer stopped while draining
    ///
    /// [`ConfigError::NodeIdOutOfRange`]: crate::ConfigError::NodeIdOutOfRange
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn set_node_id(&mut self, node_id: u16) -> Result<()> {
        if let Err(e) = validate_node_id(u64::from(node_id)) {
            #[cfg(feature = "tracing")]
            tracing::warn!(node_id, error = %e, "rejected node id");
            return Err(e.into());
        }

        let generation = self.shared.publish_node_id(node_id);
        self.drain(generation)
    }

    /// Sets the node identity from a 5-bit datacenter and a 5-bit worker.
    ///
    /// # Errors
    ///
    /// See [`Self::set_node_id`].
    pub fn set_datacenter_worker(&mut self, datacenter: u8, worker: u8) -> Result<()> {
        self.set_datacenter_worker_with_len(datacenter, worker, DEFAULT_WORKER_BITS)
    }

    /// Sets the node identity to `(datacenter << worker_bits) | worker`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WorkerBitsTooLarge`] if `worker_bits > 10`, and
    /// otherwise everything [`Self::set_node_id`] can return.
    ///
    /// [`ConfigError::WorkerBitsTooLarge`]: crate::ConfigError::WorkerBitsTooLarge
    pub fn set_datacenter_worker_with_len(
        &mut self,
        datacenter: u8,
        worker: u8,
        worker_bits: u8,
    ) -> Result<()> {
        let node_id = combine_datacenter_and_worker(datacenter, worker, worker_bits)?;
        self.set_node_id(node_id)
    }

    /// Discards queued ids until one tagged with `generation` (or later)
    /// arrives. That first fresh id is discarded as well.
    fn drain(&mut self, generation: u64) -> Result<()> {
        let rx = self.rx.get_mut();
        let shared = &self.shared;
        let mut discarded = 0_usize;
        loop {
            let minted = rx.blocking_recv().ok_or_else(|| shared.stop_error())?;
            discarded += 1;
            if minted.generation >= generation {
                break;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(generation, discarded, "drain barrier complete");
        #[cfg(not(feature = "tracing"))]
        let _ = discarded;

        Ok(())
    }
}

/// Step-by-step construction of an [`IdPipeline`].
///
/// # Example
///
/// ```
/// use flakepipe::{ClockMode, IdPipeline, SystemClock};
/// use flakepipe::PipelineBuilder;
///
/// let pipeline = PipelineBuilder::with_clock(SystemClock)
///     .node_id(3)
///     .capacity(64)
///     .clock_mode(ClockMode::Wall)
///     .build()?;
/// assert_eq!(pipeline.node_id(), 3);
/// # Ok::<(), flakepipe::Error>(())
/// ```
pub struct PipelineBuilder<T> {
    config: PipelineConfig,
    clock: T,
    resolver: Box<dyn SequenceResolver + Send>,
}

impl<T> PipelineBuilder<T>
where
    T: TimeSource + Clone + Send + 'static,
{
    /// Starts from [`PipelineConfig::default`] with the given clock.
    pub fn with_clock(clock: T) -> Self {
        Self {
            config: PipelineConfig::default(),
            clock,
            resolver: Box::new(LocalResolver::new()),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn start_epoch(mut self, start_epoch: SystemTime) -> Self {
        self.config.start_epoch = start_epoch;
        self
    }

    pub fn node_id(mut self, node_id: u16) -> Self {
        self.config.node_id = node_id;
        self
    }

    /// Takes the node identity from a provider, falling back to `0` when the
    /// provider has none.
    pub fn node_id_from(mut self, provider: &impl NodeIdProvider) -> Self {
        self.config.node_id = provider.node_id().unwrap_or_else(|| {
            #[cfg(feature = "tracing")]
            tracing::warn!("node identity unavailable, falling back to node 0");
            0
        });
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn clock_mode(mut self, clock_mode: ClockMode) -> Self {
        self.config.clock_mode = clock_mode;
        self
    }

    /// Swaps the producer's sequence strategy, e.g. for an
    /// [`AtomicResolver`] shared with other callers.
    ///
    /// [`AtomicResolver`]: crate::AtomicResolver
    pub fn resolver(mut self, resolver: impl SequenceResolver + Send + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Validates the configuration and starts the producer thread.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::ProducerSpawn`] if the thread cannot be created
    pub fn build(self) -> Result<IdPipeline<T>> {
        let Self {
            config,
            clock,
            resolver,
        } = self;

        let now_ms = clock.current_millis() as i64;
        if let Err(e) = config.validate(now_ms) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "rejected pipeline configuration");
            return Err(e.into());
        }

        let shared = Arc::new(SharedConfig::new(
            to_unix_millis(config.start_epoch),
            config.node_id,
        ));
        let (tx, rx) = mpsc::channel(config.capacity);
        let producer = Producer {
            tx,
            shared: Arc::clone(&shared),
            clock: clock.clone(),
            clock_mode: config.clock_mode,
            resolver,
        };

        let handle = thread::Builder::new()
            .name("flakepipe-producer".into())
            .spawn(move || producer.run())
            .map_err(|e| Error::ProducerSpawn {
                reason: e.to_string(),
            })?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            node_id = config.node_id,
            capacity = config.capacity,
            mode = ?config.clock_mode,
            "id pipeline started"
        );

        Ok(IdPipeline {
            rx: Mutex::new(rx),
            shared,
            clock,
            clock_mode: config.clock_mode,
            capacity: config.capacity,
            _producer: handle,
        })
    }
}
