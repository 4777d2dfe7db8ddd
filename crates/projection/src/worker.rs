//! Background delivery of the live feed to a [`FanoutDispatcher`].
//!
//! A router thread drains the bus subscription and forwards each message to one
//! of `N` partition threads chosen by hashing the entity id, so every entity's
//! records are applied by a single thread in arrival order. Broadcast messages
//! carry no entity and go to partition 0.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use adhoc_core::EntityId;
use adhoc_events::{EventBus, FeedMessage, Subscription};

use crate::dispatcher::FanoutDispatcher;

const TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn feed worker thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Partition an entity's records are applied on.
pub fn partition_for(entity_id: &EntityId, partitions: NonZeroUsize) -> usize {
    let mut hasher = DefaultHasher::new();
    entity_id.hash(&mut hasher);
    // Modulo keeps the value below `partitions`, which fits in usize.
    (hasher.finish() % partitions.get() as u64) as usize
}

/// Handle to stop and join a running [`FeedWorker`].
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    router: Option<thread::JoinHandle<()>>,
    partitions: Vec<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop routing, let partitions drain what they already received, and join all threads.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(router) = self.router.take() {
            if router.join().is_err() {
                warn!("feed router thread panicked");
            }
        }
        for (index, partition) in self.partitions.drain(..).enumerate() {
            if partition.join().is_err() {
                warn!(partition = index, "feed partition thread panicked");
            }
        }
    }
}

#[derive(Debug)]
pub struct FeedWorker;

impl FeedWorker {
    /// Subscribe to `bus` and start delivering its messages to `dispatcher`.
    ///
    /// The subscription is taken before this returns, so every message published
    /// afterwards is delivered.
    pub fn spawn<B>(
        name: &str,
        bus: &B,
        dispatcher: Arc<FanoutDispatcher>,
        partitions: NonZeroUsize,
    ) -> Result<WorkerHandle, WorkerError>
    where
        B: EventBus<FeedMessage> + ?Sized,
    {
        let subscription = bus.subscribe();

        let mut senders = Vec::with_capacity(partitions.get());
        let mut partition_handles = Vec::with_capacity(partitions.get());
        for index in 0..partitions.get() {
            let (tx, rx) = mpsc::channel::<FeedMessage>();
            let dispatcher = dispatcher.clone();
            let thread_name = format!("{name}-p{index}");
            let worker = name.to_owned();
            let join = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || partition_loop(&worker, index, rx, &dispatcher))
                .map_err(|source| WorkerError::Spawn {
                    name: thread_name,
                    source,
                })?;
            senders.push(tx);
            partition_handles.push(join);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let worker = name.to_owned();
        let router = thread::Builder::new()
            .name(format!("{name}-router"))
            .spawn(move || router_loop(&worker, subscription, shutdown_rx, senders, partitions))
            .map_err(|source| WorkerError::Spawn {
                name: format!("{name}-router"),
                source,
            })?;

        debug!(worker = name, partitions = partitions.get(), "feed worker started");
        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            router: Some(router),
            partitions: partition_handles,
        })
    }
}

fn router_loop(
    name: &str,
    subscription: Subscription<FeedMessage>,
    shutdown_rx: mpsc::Receiver<()>,
    senders: Vec<mpsc::Sender<FeedMessage>>,
    partitions: NonZeroUsize,
) {
    let mut stopped = vec![false; senders.len()];
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(TICK) {
            Ok(message) => {
                let index = message
                    .partition_key()
                    .map_or(0, |id| partition_for(id, partitions));
                // Other partitions keep routing; entities on a stopped one
                // heal from the log on their next query.
                if senders[index].send(message).is_err() && !stopped[index] {
                    stopped[index] = true;
                    warn!(worker = name, partition = index, "feed partition stopped, dropping its messages");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "feed router stopped");
    // Dropping `senders` here lets partitions finish their queues and exit.
}

fn partition_loop(
    name: &str,
    index: usize,
    rx: mpsc::Receiver<FeedMessage>,
    dispatcher: &FanoutDispatcher,
) {
    while let Ok(message) = rx.recv() {
        if let Err(err) = dispatcher.handle(&message) {
            warn!(worker = name, partition = index, error = %err, "feed message processing failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Sender;

    use parking_lot::Mutex;

    use adhoc_events::{EventRecord, InMemoryEventBus};

    use super::*;
    use crate::dispatcher::LiveEventHandler;
    use crate::error::RepositoryError;
    use crate::testing::{Deposited, record};

    /// Forwards every delivery (with the handling thread's name) to a channel.
    struct Forward(Mutex<Sender<(String, String, u64)>>);

    impl LiveEventHandler for Forward {
        fn name(&self) -> &str {
            "forward"
        }

        fn can_handle(&self, _: &EventRecord) -> bool {
            true
        }

        fn on(&self, record: &EventRecord) -> Result<(), RepositoryError> {
            let thread = thread::current().name().unwrap_or_default().to_owned();
            let _ = self.0.lock().send((
                thread,
                record.entity_id().to_string(),
                record.sequence_number(),
            ));
            Ok(())
        }

        fn reset_cache(&self) {}
    }

    #[test]
    fn partition_is_stable_and_in_range() {
        let partitions = NonZeroUsize::new(4).unwrap();
        for i in 0..100 {
            let id = EntityId::new(format!("acc-{i}"));
            let p = partition_for(&id, partitions);
            assert!(p < 4);
            assert_eq!(p, partition_for(&id, partitions));
        }
    }

    #[test]
    fn entity_records_stay_on_one_partition_in_order() {
        let bus = InMemoryEventBus::<FeedMessage>::new();
        let (tx, rx) = mpsc::channel();
        let dispatcher = Arc::new(FanoutDispatcher::new());
        dispatcher.register(Arc::new(Forward(Mutex::new(tx))));
        let handle = FeedWorker::spawn(
            "feed",
            &bus,
            dispatcher,
            NonZeroUsize::new(3).unwrap(),
        )
        .unwrap();

        for seq in 0..20 {
            for entity in ["a", "b", "c"] {
                bus.publish(record(entity, seq, &Deposited { amount: 1 }).into())
                    .unwrap();
            }
        }

        let delivered: Vec<_> = (0..60)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        handle.shutdown();

        for entity in ["a", "b", "c"] {
            let mine: Vec<_> = delivered.iter().filter(|(_, e, _)| e == entity).collect();
            let seqs: Vec<u64> = mine.iter().map(|(_, _, s)| *s).collect();
            assert_eq!(seqs, (0..20).collect::<Vec<_>>());

            let expected = format!("feed-p{}", partition_for(&EntityId::new(entity), NonZeroUsize::new(3).unwrap()));
            assert!(mine.iter().all(|(thread, _, _)| *thread == expected));
        }
    }

    /// Panics on records of entity `bad`, passes everything else.
    struct PanicsOnBad;

    impl LiveEventHandler for PanicsOnBad {
        fn name(&self) -> &str {
            "panics-on-bad"
        }

        fn can_handle(&self, _: &EventRecord) -> bool {
            true
        }

        fn on(&self, record: &EventRecord) -> Result<(), RepositoryError> {
            if record.entity_id().as_str() == "bad" {
                panic!("update operation overflowed");
            }
            Ok(())
        }

        fn reset_cache(&self) {}
    }

    #[test]
    fn panicking_updater_does_not_stop_the_feed() {
        let bus = InMemoryEventBus::<FeedMessage>::new();
        let (tx, rx) = mpsc::channel();
        let dispatcher = Arc::new(FanoutDispatcher::new());
        dispatcher.register(Arc::new(PanicsOnBad));
        dispatcher.register(Arc::new(Forward(Mutex::new(tx))));
        let handle = FeedWorker::spawn("feed", &bus, dispatcher, NonZeroUsize::MIN).unwrap();

        bus.publish(record("bad", 0, &Deposited { amount: 1 }).into())
            .unwrap();
        for seq in 0..5 {
            bus.publish(record("good", seq, &Deposited { amount: 1 }).into())
                .unwrap();
        }

        let delivered: Vec<_> = (0..6)
            .map(|_| {
                let (_, entity, seq) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
                (entity, seq)
            })
            .collect();
        handle.shutdown();

        let mut expected = vec![("bad".to_owned(), 0)];
        expected.extend((0..5).map(|seq| ("good".to_owned(), seq)));
        assert_eq!(delivered, expected);
    }

    #[test]
    fn shutdown_joins_an_idle_worker() {
        let bus = InMemoryEventBus::<FeedMessage>::new();
        let handle = FeedWorker::spawn(
            "idle",
            &bus,
            Arc::new(FanoutDispatcher::new()),
            NonZeroUsize::new(2).unwrap(),
        )
        .unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        handle.shutdown();
    }
}
