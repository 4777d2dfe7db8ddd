//! Shared fixtures for unit tests: a tiny account domain and a recording log.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use adhoc_core::EntityId;
use adhoc_events::{
    DomainEvent, EventLog, EventLogError, EventMeta, EventRecord, EventStream, InMemoryEventLog,
};

use crate::registry::DispatchRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub owner: String,
}

impl DomainEvent for AccountOpened {
    const EVENT_TYPE: &'static str = "test.account.opened";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposited {
    pub amount: i64,
}

impl DomainEvent for Deposited {
    const EVENT_TYPE: &'static str = "test.account.deposited";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawn {
    pub amount: i64,
}

impl DomainEvent for Withdrawn {
    const EVENT_TYPE: &'static str = "test.account.withdrawn";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Renamed {
    pub owner: String,
}

impl DomainEvent for Renamed {
    const EVENT_TYPE: &'static str = "test.account.renamed";
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Balance {
    pub owner: String,
    pub balance: i64,
    pub version: u64,
}

impl Balance {
    pub fn opened(e: AccountOpened, meta: EventMeta<'_>) -> Self {
        Self {
            owner: e.owner,
            balance: 0,
            version: meta.sequence_number,
        }
    }

    pub fn with_delta(self, delta: i64) -> Self {
        Self {
            balance: self.balance + delta,
            ..self
        }
    }
}

/// Balance projection: immutable deposits, in-place withdrawals, renames ignored.
pub fn balance_registry() -> DispatchRegistry<Balance> {
    DispatchRegistry::builder("balance")
        .constructor(|e: AccountOpened, m| Balance::opened(e, m))
        .update(|s: Balance, e: Deposited, m: EventMeta<'_>| Balance {
            version: m.sequence_number,
            ..s.with_delta(e.amount)
        })
        .update_in_place(|s: &mut Balance, e: Withdrawn, m| {
            s.balance -= e.amount;
            s.version = m.sequence_number;
        })
        .build()
        .expect("balance registry is valid")
}

pub fn record<E: DomainEvent>(entity: &str, seq: u64, event: &E) -> EventRecord {
    EventRecord::from_typed(EntityId::new(entity), seq, event, Utc::now()).unwrap()
}

/// One observed call against the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCall {
    ReadFrom { entity: String, from: u64 },
    ReadFromSnapshot { entity: String },
    TailSeq { entity: String },
}

/// In-memory log that records every read it serves.
#[derive(Debug, Default, Clone)]
pub struct RecordingLog {
    pub inner: Arc<InMemoryEventLog>,
    calls: Arc<Mutex<Vec<LogCall>>>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<LogCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn append<E: DomainEvent>(&self, entity: &str, event: &E) -> EventRecord {
        self.inner
            .append_typed(&EntityId::new(entity), event)
            .unwrap()
    }
}

impl EventLog for RecordingLog {
    fn read_from(
        &self,
        entity_id: &EntityId,
        from_seq: u64,
    ) -> Result<EventStream<'_>, EventLogError> {
        self.calls.lock().push(LogCall::ReadFrom {
            entity: entity_id.to_string(),
            from: from_seq,
        });
        self.inner.read_from(entity_id, from_seq)
    }

    fn read_from_snapshot(&self, entity_id: &EntityId) -> Result<EventStream<'_>, EventLogError> {
        self.calls.lock().push(LogCall::ReadFromSnapshot {
            entity: entity_id.to_string(),
        });
        self.inner.read_from_snapshot(entity_id)
    }

    fn tail_seq(&self, entity_id: &EntityId) -> Result<Option<u64>, EventLogError> {
        self.calls.lock().push(LogCall::TailSeq {
            entity: entity_id.to_string(),
        });
        self.inner.tail_seq(entity_id)
    }
}
