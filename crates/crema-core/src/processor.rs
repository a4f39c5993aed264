//! The scale processor.
//!
//! [`ScaleProcessor`] binds to at most one [`Scale`] at a time, keeps a bounded
//! history of its weight samples, runs an [`EstimatorPipeline`] over that
//! history on every sample, and republishes the result as a
//! [`WeightAndFlowUpdate`].
//!
//! # Locking
//!
//! - A single fair `tokio::sync::Mutex` guards history, estimates and the
//!   binding generation. Append, estimate and publish of one sample happen
//!   under it as one unit, and tares clear history under it too.
//! - `binding` serializes [`ScaleProcessor::set_scale`] and owns the
//!   subscription ids of the current scale.
//! - `transition` is held for the whole of
//!   [`ScaleProcessor::change_scale_to_id`] so that the reconnect monitor never
//!   acts on a scale that is being replaced.
//!
//! Handlers subscribed to a scale capture only a [`Weak`] reference to the
//! processor state plus the generation they were created for. A sample
//! delivered by a handler of an earlier binding is discarded.
//!
//! Subscribers of [`ScaleProcessor::event_weight_and_flow_update`] run while
//! the state lock is held, so they must not call lifecycle operations on the
//! processor directly; spawn a task instead.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use crema_core::{MockDiscovery, ProcessorConfig, ScaleProcessor};
//! use crema_core::scan::DiscoveredScale;
//!
//! #[tokio::main]
//! async fn main() -> crema_core::Result<()> {
//!     let discovery = Arc::new(MockDiscovery::new());
//!     discovery
//!         .add_cached(DiscoveredScale::new("AA:BB:CC:DD:EE:FF", Some("Skale")))
//!         .await;
//!
//!     let config = ProcessorConfig::default();
//!     let processor = ScaleProcessor::from_discovery(discovery.clone(), config)?;
//!     processor.change_scale_to_id(Some("AA:BB:CC:DD:EE:FF")).await?;
//!     assert_eq!(processor.scale_address().as_deref(), Some("AA:BB:CC:DD:EE:FF"));
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, PoisonError, RwLock, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crema_types::{Connectivity, ScaleType, TareEvent, WeightAndFlowUpdate, WeightSample};

use crate::bus::{EventBus, SubscriptionId};
use crate::config::ProcessorConfig;
use crate::error::{Error, Result};
use crate::estimator::{EstimatorPipeline, Estimates};
use crate::events::{EventDispatcher, EventReceiver, ScaleEvent, ScaleId};
use crate::history::{HistoryBuffer, HistorySnapshot};
use crate::traits::{Discovery, ScaleFactory, SharedScale, same_scale};
use crate::util::identifiers_match;

/// Mutable estimation state, guarded by one lock.
#[derive(Debug)]
struct ProcessorState {
    history: HistoryBuffer,
    estimates: Estimates,
    pipeline: EstimatorPipeline,
    generation: u64,
}

/// State reachable from scale event handlers.
struct Shared {
    state: Mutex<ProcessorState>,
    weight_and_flow: EventBus<WeightAndFlowUpdate>,
    events: EventDispatcher,
}

impl Shared {
    async fn on_weight(&self, generation: u64, sample: WeightSample) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            trace!("Dropping sample from superseded binding {}", generation);
            return;
        }

        state.history.append(sample.scale_time, sample.weight);
        let snapshot = state.history.snapshot();
        let ProcessorState {
            pipeline,
            estimates,
            ..
        } = &mut *state;
        pipeline.run(&snapshot, estimates);

        let update = weight_and_flow_update(&sample, estimates);
        trace!(?update, "Publishing weight and flow");
        self.weight_and_flow.publish(update).await;
    }

    async fn on_tare(&self, generation: u64, scale: &ScaleId, tare: TareEvent) {
        {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                trace!("Dropping tare from superseded binding {}", generation);
                return;
            }
            state.history.clear();
        }
        debug!("Tare from {} at {:.3}; history cleared", scale.address, tare.scale_time);
        self.events.send(ScaleEvent::TareSeen {
            scale: scale.clone(),
        });
    }
}

fn weight_and_flow_update(sample: &WeightSample, estimates: &Estimates) -> WeightAndFlowUpdate {
    WeightAndFlowUpdate {
        arrival_time: sample.arrival_time,
        scale_time: sample.scale_time,
        current_weight: estimates.current_weight.value,
        current_weight_time: estimates.current_weight.time,
        average_flow: estimates.average_flow.value,
        average_flow_time: estimates.average_flow.time,
        median_weight: estimates.median_weight.value,
        median_weight_time: estimates.median_weight.time,
        median_flow: estimates.median_flow.value,
        median_flow_time: estimates.median_flow.time,
    }
}

type Handler<T> = Box<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

fn weight_handler(shared: Weak<Shared>, generation: u64) -> Handler<WeightSample> {
    Box::new(move |sample| {
        let shared = shared.clone();
        async move {
            if let Some(shared) = shared.upgrade() {
                shared.on_weight(generation, sample).await;
            }
        }
        .boxed()
    })
}

fn tare_handler(shared: Weak<Shared>, generation: u64, scale: ScaleId) -> Handler<TareEvent> {
    Box::new(move |tare| {
        let shared = shared.clone();
        let scale = scale.clone();
        async move {
            if let Some(shared) = shared.upgrade() {
                shared.on_tare(generation, &scale, tare).await;
            }
        }
        .boxed()
    })
}

/// Subscriptions held on the current scale.
#[derive(Debug, Default)]
struct Binding {
    weight: Option<SubscriptionId>,
    tare: Option<SubscriptionId>,
    generation: u64,
}

async fn detach<T>(source: &EventBus<T>, id: Option<SubscriptionId>)
where
    T: Clone + Send + 'static,
{
    let Some(id) = id else {
        return;
    };
    if let Err(e) = source.unsubscribe(id).await {
        warn!("Failed to unsubscribe from {}: {}", source.name(), e);
    }
}

/// Turns a scale's raw samples into weight and flow estimates and manages
/// which scale is current.
pub struct ScaleProcessor {
    shared: Arc<Shared>,
    current: RwLock<Option<SharedScale>>,
    binding: Mutex<Binding>,
    pub(crate) transition: Mutex<()>,
    discovery: Arc<dyn Discovery>,
    factory: Arc<dyn ScaleFactory>,
    pub(crate) config: ProcessorConfig,
}

impl std::fmt::Debug for ScaleProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScaleProcessor")
            .field("scale", &self.current_scale())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScaleProcessor {
    /// Create an unbound processor with the standard estimator pipeline.
    pub fn new(
        discovery: Arc<dyn Discovery>,
        factory: Arc<dyn ScaleFactory>,
        config: ProcessorConfig,
    ) -> Result<Self> {
        let pipeline = config.estimators.build_pipeline()?;
        Self::with_pipeline(discovery, factory, config, pipeline)
    }

    /// Create an unbound processor whose discovery also builds the scales.
    pub fn from_discovery<D>(discovery: Arc<D>, config: ProcessorConfig) -> Result<Self>
    where
        D: Discovery + ScaleFactory + 'static,
    {
        let factory: Arc<dyn ScaleFactory> = discovery.clone();
        Self::new(discovery, factory, config)
    }

    /// Create an unbound processor running a custom estimator pipeline.
    ///
    /// History capacity grows to the largest window the pipeline asks for.
    pub fn with_pipeline(
        discovery: Arc<dyn Discovery>,
        factory: Arc<dyn ScaleFactory>,
        config: ProcessorConfig,
        pipeline: EstimatorPipeline,
    ) -> Result<Self> {
        config.validate()?;

        let mut history = HistoryBuffer::new(config.history_capacity);
        history.ensure_capacity(pipeline.required_history());
        debug!(
            "Processor history capacity {} for {} estimator(s)",
            history.capacity(),
            pipeline.len()
        );

        let events = EventDispatcher::new(config.event_capacity);
        let shared = Arc::new(Shared {
            state: Mutex::new(ProcessorState {
                history,
                estimates: Estimates::default(),
                pipeline,
                generation: 0,
            }),
            weight_and_flow: EventBus::new("weight-and-flow-update"),
            events,
        });

        Ok(Self {
            shared,
            current: RwLock::new(None),
            binding: Mutex::new(Binding::default()),
            transition: Mutex::new(()),
            discovery,
            factory,
            config,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Source of derived weight and flow events.
    pub fn event_weight_and_flow_update(&self) -> &EventBus<WeightAndFlowUpdate> {
        &self.shared.weight_and_flow
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ScaleEvent) {
        self.shared.events.send(event);
    }

    pub(crate) fn current_scale(&self) -> Option<SharedScale> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_current(&self, scale: &SharedScale) -> bool {
        self.current_scale()
            .is_some_and(|current| same_scale(&current, scale))
    }

    // --- Null-safe status ---

    /// Address of the current scale.
    pub fn scale_address(&self) -> Option<String> {
        self.current_scale().map(|s| s.address().to_string())
    }

    /// Name of the current scale.
    pub fn scale_name(&self) -> Option<String> {
        self.current_scale()
            .and_then(|s| s.name().map(str::to_string))
    }

    /// Model of the current scale.
    pub fn scale_type(&self) -> Option<ScaleType> {
        self.current_scale().map(|s| s.scale_type())
    }

    /// Link status of the current scale; `NotConnected` when none is bound.
    pub fn scale_connectivity(&self) -> Connectivity {
        self.current_scale()
            .map(|s| s.connectivity())
            .unwrap_or(Connectivity::NotConnected)
    }

    /// Copy of the current history, oldest sample first.
    pub async fn history(&self) -> HistorySnapshot {
        self.shared.state.lock().await.history.snapshot()
    }

    /// Current estimator outputs.
    pub async fn estimates(&self) -> Estimates {
        self.shared.state.lock().await.estimates
    }

    // --- Lifecycle ---

    /// Make `scale` the current scale (or unbind with `None`).
    ///
    /// A no-op if `scale` already is the current scale. Otherwise detaches
    /// from the previous scale, attaches to the new one and resets history and
    /// estimates. Subscription failures are logged, never returned. The
    /// previous scale is neither disconnected nor decommissioned here.
    pub async fn set_scale(&self, scale: Option<SharedScale>) {
        let mut binding = self.binding.lock().await;
        let previous = self.current_scale();

        let unchanged = match (&previous, &scale) {
            (Some(a), Some(b)) => same_scale(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            debug!("set_scale: already current, nothing to do");
            return;
        }

        if let Some(old) = &previous {
            let weight = binding.weight.take();
            let tare = binding.tare.take();
            futures::join!(
                detach(old.weight_updates(), weight),
                detach(old.tare_events(), tare),
            );
        }

        binding.generation += 1;
        let generation = binding.generation;
        {
            let mut state = self.shared.state.lock().await;
            state.generation = generation;
            state.history.clear();
            state.estimates = Estimates::default();
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = scale.clone();

        match (&scale, &previous) {
            (Some(new), _) => {
                let id = ScaleId::of(new.as_ref());
                let weak = Arc::downgrade(&self.shared);
                let (weight, tare) = futures::join!(
                    new.weight_updates()
                        .subscribe(weight_handler(weak.clone(), generation)),
                    new.tare_events()
                        .subscribe(tare_handler(weak, generation, id.clone())),
                );
                binding.weight = weight
                    .inspect_err(|e| warn!("Weight subscription failed: {}", e))
                    .ok();
                binding.tare = tare
                    .inspect_err(|e| warn!("Tare subscription failed: {}", e))
                    .ok();
                info!("Bound scale {} ({:?})", id.address, id.name);
                self.emit(ScaleEvent::Bound { scale: id });
            }
            (None, Some(old)) => {
                info!("Unbound scale {}", old.address());
                self.emit(ScaleEvent::Unbound {
                    previous: ScaleId::of(old.as_ref()),
                });
            }
            (None, None) => {}
        }
    }

    /// Replace the current scale with the device `id`, or release it with `None`.
    ///
    /// Returns once the new scale has connected or failed to. A no-op if `id`
    /// already names the current scale, or if `None` is requested while
    /// unbound. Whatever happens, a previous scale that is no longer current
    /// afterwards is disconnected and decommissioned.
    ///
    /// # Errors
    ///
    /// - [`Error::NoAddress`] if `id` is neither cached nor found by scanning.
    /// - [`Error::Instantiation`] if the device is not a supported scale.
    /// - Connect and disconnect failures of the scales involved.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn change_scale_to_id(&self, id: Option<&str>) -> Result<()> {
        let _transition = self.transition.lock().await;
        let requested = id.map(str::trim).filter(|s| !s.is_empty());
        let previous = self.current_scale();

        match (&previous, requested) {
            (None, None) => {
                debug!("No scale bound and none requested");
                return Ok(());
            }
            (Some(current), Some(id)) if identifiers_match(current.address(), id) => {
                info!("Already using {}. No action taken", id);
                return Ok(());
            }
            _ => {}
        }

        let result = match requested {
            None => {
                self.set_scale(None).await;
                Ok(())
            }
            Some(id) => self.replace_with(id, previous.as_ref()).await,
        };

        if let Some(old) = previous
            && !self.is_current(&old)
        {
            self.retire(old).await;
        }
        result
    }

    async fn replace_with(&self, id: &str, previous: Option<&SharedScale>) -> Result<()> {
        let device = match self.discovery.resolve_cached(id).await {
            Some(device) => device,
            None => {
                warn!("No record of {}, initiating scan", id);
                self.discovery
                    .scan_for_address(id, self.config.bluetooth.connect_timeout)
                    .await?
            }
        };

        if let Some(old) = previous {
            info!("Disconnecting {}", old.address());
            self.disconnect_scale(old).await?;
        }

        let scale = self.factory.create(&device).await?;
        self.set_scale(Some(Arc::clone(&scale))).await;
        scale.connect().await?;
        info!("Connected to {}", scale.address());
        self.emit(ScaleEvent::Connected {
            scale: ScaleId::of(scale.as_ref()),
        });
        Ok(())
    }

    /// Disconnect within the configured timeout; "not connected" is success.
    async fn disconnect_scale(&self, scale: &SharedScale) -> Result<()> {
        let limit = self.config.bluetooth.disconnect_timeout;
        match timeout(limit, scale.disconnect()).await {
            Err(_) => Err(Error::timeout("disconnect scale", limit)),
            Ok(Err(e)) if e.is_not_connected() => {
                debug!("{} was not connected", scale.address());
                Ok(())
            }
            Ok(result) => result,
        }
    }

    /// Tear down a scale that is no longer current.
    async fn retire(&self, scale: SharedScale) {
        if let Err(e) = self.disconnect_scale(&scale).await {
            warn!("Disconnecting retired scale {} failed: {}", scale.address(), e);
        }
        scale.decommission().await;
        info!("Retired scale {}", scale.address());
        self.emit(ScaleEvent::Retired {
            scale: ScaleId::of(scale.as_ref()),
        });
    }

    /// Bind the first recognized scale found by a scan.
    ///
    /// Does nothing (with a warning) if a scale is already connected or if
    /// `enabled` is false. Returns the address of the current scale.
    pub async fn first_if_found(&self, enabled: bool) -> Result<Option<String>> {
        if self.scale_connectivity().is_connected() {
            warn!("Scale already connected, not scanning for another");
            return Ok(self.scale_address());
        }
        if !enabled {
            warn!("first_if_found called while disabled");
            return Ok(self.scale_address());
        }

        let prefixes = ScaleType::recognized_prefixes();
        let found = self
            .discovery
            .find_first_matching(&prefixes, self.config.bluetooth.scan_time)
            .await?;

        match found {
            Some(device) => {
                info!("Found {:?} at {}", device.name, device.identifier);
                self.change_scale_to_id(Some(&device.identifier)).await?;
            }
            None => info!("No recognized scale found"),
        }
        Ok(self.scale_address())
    }

    /// Unbind and tear down the current scale, then close the weight and
    /// flow source. The processor is not meant to be reused afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        self.change_scale_to_id(None).await?;
        self.shared.weight_and_flow.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDiscovery, MockScale};
    use crate::traits::Scale;

    fn processor() -> (Arc<MockDiscovery>, ScaleProcessor) {
        let discovery = Arc::new(MockDiscovery::new());
        let config = ProcessorConfig::default();
        let processor = ScaleProcessor::from_discovery(Arc::clone(&discovery), config).unwrap();
        (discovery, processor)
    }

    fn mock(address: &str) -> Arc<MockScale> {
        Arc::new(MockScale::new(address, ScaleType::AtomaxSkaleII))
    }

    #[tokio::test]
    async fn test_weight_sample_scenario() {
        let (_, processor) = processor();
        let scale = mock("AA:BB");
        processor.set_scale(Some(scale.clone())).await;

        let updates = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        processor
            .event_weight_and_flow_update()
            .subscribe(move |u: WeightAndFlowUpdate| {
                let sink = Arc::clone(&sink);
                async move { sink.lock().unwrap().push(u) }
            })
            .await
            .unwrap();

        scale.push_weight(0.0, 0.0).await;
        scale.push_weight(0.5, 10.0).await;
        scale.push_weight(1.0, 20.0).await;

        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 3);
        let last = updates[2];
        assert_eq!((last.current_weight, last.current_weight_time), (20.0, 1.0));
        assert!((last.average_flow - 20.0).abs() < 1e-9);
        assert_eq!(last.average_flow_time, 1.0);
        assert_eq!(last.median_weight, 10.0);
        assert_eq!(last.scale_time, 1.0);
        // Not enough samples for the median flow sub-window yet.
        assert_eq!(last.median_flow, 0.0);
    }

    #[tokio::test]
    async fn test_tare_clears_history() {
        let (_, processor) = processor();
        let scale = mock("AA:BB");
        processor.set_scale(Some(scale.clone())).await;
        let mut events = processor.events();

        scale.push_weight(1.0, 5.0).await;
        scale.push_weight(2.0, 6.0).await;
        scale.push_tare(2.5).await;
        assert!(processor.history().await.is_empty());

        scale.push_weight(3.0, 0.0).await;
        let history = processor.history().await;
        assert_eq!(history.times(), &[3.0]);
        assert!(matches!(
            events.try_recv().unwrap(),
            ScaleEvent::TareSeen { .. }
        ));
    }

    #[tokio::test]
    async fn test_set_scale_swaps_subscriptions_and_resets() {
        let (_, processor) = processor();
        let a = mock("AA:AA");
        let b = mock("BB:BB");

        processor.set_scale(Some(a.clone())).await;
        a.push_weight(1.0, 3.0).await;
        assert_eq!(processor.estimates().await.current_weight.value, 3.0);

        processor.set_scale(Some(b.clone())).await;
        assert_eq!(a.weight_updates().subscriber_count().await, 0);
        assert_eq!(a.tare_events().subscriber_count().await, 0);
        assert_eq!(b.weight_updates().subscriber_count().await, 1);
        assert!(processor.history().await.is_empty());
        assert_eq!(processor.estimates().await, Estimates::default());

        // The old scale no longer feeds the processor.
        assert_eq!(a.push_weight(2.0, 99.0).await, 0);
        assert!(processor.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_scale_same_scale_is_noop() {
        let (_, processor) = processor();
        let a = mock("AA:AA");
        processor.set_scale(Some(a.clone())).await;
        a.push_weight(1.0, 3.0).await;

        processor.set_scale(Some(a.clone())).await;
        assert_eq!(processor.history().await.len(), 1);
        assert_eq!(a.weight_updates().subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_set_scale_tolerates_closed_source() {
        let (_, processor) = processor();
        let a = mock("AA:AA");
        a.weight_updates().close().await;

        processor.set_scale(Some(a.clone())).await;
        assert_eq!(processor.scale_address().as_deref(), Some("AA:AA"));
        assert_eq!(a.tare_events().subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let (_, processor) = processor();
        let a = mock("AA:AA");
        processor.set_scale(Some(a.clone())).await;

        // A handler from the first binding delivering late.
        let stale = weight_handler(Arc::downgrade(&processor.shared), 1);
        processor.set_scale(Some(mock("BB:BB"))).await;
        stale(WeightSample::new(1.0, 50.0)).await;

        assert!(processor.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_null_safe_accessors() {
        let (_, processor) = processor();
        assert_eq!(processor.scale_connectivity(), Connectivity::NotConnected);
        assert_eq!(processor.scale_address(), None);
        assert_eq!(processor.scale_name(), None);
        assert_eq!(processor.scale_type(), None);
    }

    #[tokio::test]
    async fn test_unbind_emits_event() {
        let (_, processor) = processor();
        let mut events = processor.events();
        processor.set_scale(Some(mock("AA:AA"))).await;
        processor.set_scale(None).await;

        assert!(matches!(events.try_recv().unwrap(), ScaleEvent::Bound { .. }));
        match events.try_recv().unwrap() {
            ScaleEvent::Unbound { previous } => assert_eq!(previous.address, "AA:AA"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_history_capacity_follows_pipeline() {
        let discovery = Arc::new(MockDiscovery::new());
        let config = ProcessorConfig::default().history_capacity(3);
        let pipeline = EstimatorPipeline::standard(20, 5).unwrap();
        let processor = ScaleProcessor::with_pipeline(
            discovery.clone(),
            discovery,
            config,
            pipeline,
        )
        .unwrap();
        let a = mock("AA:AA");
        processor.set_scale(Some(a.clone())).await;
        for i in 0..25 {
            a.push_weight(i as f64, i as f64).await;
        }
        assert_eq!(processor.history().await.len(), 20);
    }

    #[derive(Debug)]
    struct PanicsOnSecondSample;

    impl crate::estimator::Estimator for PanicsOnSecondSample {
        fn slot(&self) -> crate::estimator::Slot {
            crate::estimator::Slot::AverageFlow
        }
        fn window(&self) -> usize {
            2
        }
        fn estimate(&self, history: &HistorySnapshot) -> crate::estimator::EstimateResult {
            assert!(history.len() < 2, "cannot handle two samples");
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_panicking_estimator_keeps_updates_flowing() {
        let discovery = Arc::new(MockDiscovery::new());
        let pipeline = EstimatorPipeline::new(vec![
            Box::new(PanicsOnSecondSample),
            Box::new(crate::estimator::CurrentWeight),
        ]);
        let processor = ScaleProcessor::with_pipeline(
            discovery.clone(),
            discovery,
            ProcessorConfig::default(),
            pipeline,
        )
        .unwrap();
        let scale = mock("AA:BB");
        processor.set_scale(Some(scale.clone())).await;

        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        processor
            .event_weight_and_flow_update()
            .subscribe(move |_: WeightAndFlowUpdate| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        for i in 0..3 {
            scale.push_weight(i as f64, 2.0 * i as f64).await;
        }

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(processor.estimates().await.current_weight.value, 4.0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let discovery = Arc::new(MockDiscovery::new());
        let config = ProcessorConfig::default().history_capacity(0);
        assert!(matches!(
            ScaleProcessor::from_discovery(discovery, config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
