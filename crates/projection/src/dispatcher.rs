//! Fan-out of live feed messages to every interested updater.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, trace};

use adhoc_events::{EventLog, EventRecord, FeedMessage};

use crate::error::{DispatchError, RepositoryError};
use crate::updater::IncrementalUpdater;

/// Object-safe view of an updater, so updaters of different state types can
/// share one dispatcher.
pub trait LiveEventHandler: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, record: &EventRecord) -> bool;

    fn on(&self, record: &EventRecord) -> Result<(), RepositoryError>;

    fn reset_cache(&self);
}

impl<S, L> LiveEventHandler for IncrementalUpdater<S, L>
where
    S: Clone + Send + Sync + 'static,
    L: EventLog,
{
    fn name(&self) -> &str {
        IncrementalUpdater::name(self)
    }

    fn can_handle(&self, record: &EventRecord) -> bool {
        IncrementalUpdater::can_handle(self, record)
    }

    fn on(&self, record: &EventRecord) -> Result<(), RepositoryError> {
        IncrementalUpdater::on(self, record)
    }

    fn reset_cache(&self) {
        IncrementalUpdater::reset_cache(self)
    }
}

impl<H> LiveEventHandler for Arc<H>
where
    H: LiveEventHandler + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn can_handle(&self, record: &EventRecord) -> bool {
        (**self).can_handle(record)
    }

    fn on(&self, record: &EventRecord) -> Result<(), RepositoryError> {
        (**self).on(record)
    }

    fn reset_cache(&self) {
        (**self).reset_cache()
    }
}

/// Routes each entity-scoped feed message to every registered updater that
/// can handle it.
///
/// One failing updater does not stop delivery to the others; failures are
/// collected and reported together as [`DispatchError::ProcessingFailure`].
#[derive(Default)]
pub struct FanoutDispatcher {
    handlers: RwLock<Vec<Arc<dyn LiveEventHandler>>>,
}

impl core::fmt::Debug for FanoutDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<String> = self
            .handlers
            .read()
            .iter()
            .map(|h| h.name().to_owned())
            .collect();
        f.debug_struct("FanoutDispatcher").field("handlers", &names).finish()
    }
}

impl FanoutDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn LiveEventHandler>) {
        debug!(handler = handler.name(), "registering live event handler");
        self.handlers.write().push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True iff the message is entity-scoped and some updater can handle it.
    pub fn can_handle(&self, message: &FeedMessage) -> bool {
        match message.record() {
            Some(record) => self.handlers.read().iter().any(|h| h.can_handle(record)),
            None => false,
        }
    }

    /// Deliver one feed message.
    ///
    /// Broadcast messages carry no entity and are ignored. Every interested
    /// updater is tried even when an earlier one returns an error or panics.
    pub fn handle(&self, message: &FeedMessage) -> Result<(), DispatchError> {
        let Some(record) = message.record() else {
            trace!(
                payload_type = message.payload_type(),
                "ignoring broadcast feed message"
            );
            return Ok(());
        };

        let handlers: Vec<_> = self.handlers.read().clone();
        let mut failed = Vec::new();
        for handler in handlers.iter().filter(|h| h.can_handle(record)) {
            // A panicking update operation counts as a failure of that updater only.
            match panic::catch_unwind(AssertUnwindSafe(|| handler.on(record))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(
                        handler = handler.name(),
                        entity_id = %record.entity_id(),
                        seq = record.sequence_number(),
                        error = %err,
                        "updater failed to apply live event"
                    );
                    failed.push(handler.name().to_owned());
                }
                Err(_) => {
                    error!(
                        handler = handler.name(),
                        entity_id = %record.entity_id(),
                        seq = record.sequence_number(),
                        "updater panicked while applying live event"
                    );
                    failed.push(handler.name().to_owned());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::ProcessingFailure {
                entity_id: record.entity_id().clone(),
                sequence_number: record.sequence_number(),
                failed,
            })
        }
    }

    /// Clear every updater's cache ahead of a replay of the feed.
    pub fn prepare_reset(&self) {
        debug!(handlers = self.len(), "resetting all projection caches");
        for handler in self.handlers.read().iter() {
            handler.reset_cache();
        }
    }
}
