//! Keeps one scale bound for the lifetime of the service.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crema_core::{EventReceiver, ScaleEvent, ScaleProcessor, WeightAndFlowUpdate};

use crate::config::ScaleConfig;

/// Wires a [`ScaleProcessor`] to logging and reconnection.
pub struct Runner {
    processor: Arc<ScaleProcessor>,
    scale: ScaleConfig,
    cancel: CancellationToken,
}

impl Runner {
    /// Create a runner for `processor`, binding as `scale` describes.
    pub fn new(processor: Arc<ScaleProcessor>, scale: ScaleConfig) -> Self {
        Self {
            processor,
            scale,
            cancel: CancellationToken::new(),
        }
    }

    /// The processor being run.
    pub fn processor(&self) -> &Arc<ScaleProcessor> {
        &self.processor
    }

    /// Bind the configured scale, or the first one found if allowed.
    ///
    /// Returns the address of the bound scale.
    pub async fn bind(&self) -> crema_core::Result<Option<String>> {
        match self.scale.id.as_deref() {
            Some(id) => {
                info!("Binding configured scale {}", id);
                self.processor.change_scale_to_id(Some(id)).await?;
                Ok(self.processor.scale_address())
            }
            None => self.processor.first_if_found(self.scale.first_if_found).await,
        }
    }

    /// Log every derived update at debug level.
    pub async fn log_updates(&self) -> crema_core::Result<()> {
        self.processor
            .event_weight_and_flow_update()
            .subscribe(|update: WeightAndFlowUpdate| async move {
                debug!(
                    scale_time = update.scale_time,
                    weight = update.current_weight,
                    median_weight = update.median_weight,
                    flow = update.average_flow,
                    median_flow = update.median_flow,
                    "Weight and flow"
                );
            })
            .await?;
        Ok(())
    }

    /// Run until `shutdown` resolves, then unbind and tear down the scale.
    ///
    /// Binding failures are logged, not returned: a scale that failed to
    /// connect stays bound and the reconnect monitor keeps trying.
    pub async fn run_until<F>(self, shutdown: F) -> crema_core::Result<()>
    where
        F: Future<Output = ()>,
    {
        self.run_with_event_sink(shutdown, log_event).await
    }

    async fn run_with_event_sink<F, S>(self, shutdown: F, sink: S) -> crema_core::Result<()>
    where
        F: Future<Output = ()>,
        S: FnMut(&ScaleEvent) + Send + 'static,
    {
        // Stopped only after teardown so Unbound and Retired are seen.
        let logger_stop = CancellationToken::new();
        let events = spawn_event_logger(self.processor.events(), logger_stop.clone(), sink);
        self.log_updates().await?;

        match self.bind().await {
            Ok(Some(address)) => info!("Using scale {}", address),
            Ok(None) => warn!("No scale bound; waiting for shutdown"),
            Err(e) => error!("Failed to bind scale: {}", e),
        }

        let monitor = self.processor.start_reconnect_monitor(self.cancel.clone());

        shutdown.await;
        info!("Shutting down");

        self.cancel.cancel();
        if let Err(e) = monitor.await {
            warn!("Reconnect monitor ended abnormally: {}", e);
        }
        let result = self.processor.shutdown().await;
        logger_stop.cancel();
        if let Err(e) = events.await {
            warn!("Event logger ended abnormally: {}", e);
        }
        result
    }
}

fn spawn_event_logger<S>(
    mut events: EventReceiver,
    cancel: CancellationToken,
    mut sink: S,
) -> JoinHandle<()>
where
    S: FnMut(&ScaleEvent) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => sink(&event),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} scale event(s)", missed),
                Err(RecvError::Closed) => break,
            }
        }
        // Events already queued when stopped
        while let Ok(event) = events.try_recv() {
            sink(&event);
        }
    })
}

fn log_event(event: &ScaleEvent) {
    match event {
        ScaleEvent::ReconnectFailed { scale, attempts } => {
            error!("Gave up reconnecting {} after {} attempts", scale.address, attempts)
        }
        ScaleEvent::TareSeen { scale } => debug!("Tare on {}", scale.address),
        other => info!(event = ?other, "Scale event"),
    }
}
