//! Save Sink: the external capability that persists a snapshot.
//!
//! The controller treats it as opaque: one call per save, a `'static`
//! future back, success or `SaveError`. Persistence format and transport
//! are the sink's business.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};

use super::error::SaveError;
use super::types::Snapshot;
use crate::store::FormStore;

pub trait SaveSink: Send + Sync {
    /// Start persisting `snapshot`. Called synchronously by the controller;
    /// the returned future is driven to completion afterwards.
    fn save(&self, snapshot: Snapshot) -> BoxFuture<'static, Result<(), SaveError>>;
}

/// Sink backed by a closure, for hosts that already have an async save fn.
pub struct FnSink<F> {
    save_fn: F,
}

impl<F, Fut> FnSink<F>
where
    F: Fn(Snapshot) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SaveError>> + Send + 'static,
{
    pub fn new(save_fn: F) -> Self {
        Self { save_fn }
    }
}

impl<F, Fut> SaveSink for FnSink<F>
where
    F: Fn(Snapshot) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SaveError>> + Send + 'static,
{
    fn save(&self, snapshot: Snapshot) -> BoxFuture<'static, Result<(), SaveError>> {
        (self.save_fn)(snapshot).boxed()
    }
}

/// Writes snapshots into a `FormStore`, optionally after a simulated delay.
pub struct StoreSink {
    store: Arc<dyn FormStore>,
    latency: Option<Duration>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn FormStore>) -> Self {
        Self {
            store,
            latency: None,
        }
    }

    /// Delay every save, the way the demo pages fake a server round trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

impl SaveSink for StoreSink {
    fn save(&self, snapshot: Snapshot) -> BoxFuture<'static, Result<(), SaveError>> {
        let store = self.store.clone();
        let latency = self.latency;
        async move {
            if let Some(delay) = latency {
                tokio::time::sleep(delay).await;
            }
            let record = store
                .upsert(&snapshot.form_id, snapshot.fields)
                .map_err(|e| SaveError::rejected(e.to_string()))?;
            tracing::debug!(
                form_id = %record.form_id,
                revision = record.revision,
                "Form stored"
            );
            Ok(())
        }
        .boxed()
    }
}
