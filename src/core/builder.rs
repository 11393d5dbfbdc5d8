use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    core::{QueryCache, QueryConfig},
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
};
use super::client::QueryClient;

/// Builder for constructing a [`QueryClient`] with optional features.
pub struct QueryClientBuilder<T> {
    cfg: QueryConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    _data: PhantomData<fn() -> T>,
}

impl<T> QueryClientBuilder<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: QueryConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            _data: PhantomData,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive cache events (queries added/removed, fetch lifecycle,
    /// retries) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds and returns the client.
    ///
    /// Initializes the event bus and the cache; with subscribers configured,
    /// also spawns their workers and the bus listener feeding them.
    ///
    /// # Panics
    /// Panics outside a tokio runtime when subscribers are configured.
    pub fn build(self) -> Arc<QueryClient<T>> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let cache = QueryCache::with_bus(bus.clone());
        let runtime_token = CancellationToken::new();

        let listener = (!self.subscribers.is_empty()).then(|| {
            let subs = SubscriberSet::new(self.subscribers, bus.clone());
            subscriber_listener(&bus, subs, runtime_token.clone())
        });

        Arc::new(QueryClient::new_internal(
            self.cfg,
            cache,
            listener,
            runtime_token,
        ))
    }
}

/// Forwards bus events to the subscriber set until cancelled, then drains and shuts it down.
fn subscriber_listener(
    bus: &Bus,
    set: SubscriberSet,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber listener lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        loop {
            match rx.try_recv() {
                Ok(ev) => set.emit(&ev),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        set.shutdown().await;
    })
}
