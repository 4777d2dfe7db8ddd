//! Minimal command side for the sample: validates, appends to the log, then
//! publishes on the live feed.
//!
//! ```text
//! command → validate against CurrentBalance → append (durable) → publish (feed)
//! ```
//!
//! Publication happens after a successful append; a failed publish leaves the
//! event durable and lets the updaters heal the gap on the next event.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use adhoc_events::{
    DomainEvent, EventBus, EventLogError, EventRecord, FeedMessage, InMemoryEventLog,
};
use adhoc_projection::{Repository, RepositoryError};

use crate::events::{
    BankAccountCreated, MoneyDeposited, MoneyWithdrawn, OwnerChanged, account_entity,
};
use crate::projections::CurrentBalance;

#[derive(Debug, Error)]
pub enum BankError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("account {0} does not exist")]
    UnknownAccount(Uuid),

    #[error("insufficient funds on {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: Uuid,
        balance: i64,
        requested: i64,
    },

    #[error(transparent)]
    Log(#[from] EventLogError),

    #[error(transparent)]
    Projection(#[from] RepositoryError),
}

/// Account commands over a shared in-memory log and feed.
pub struct Bank<B> {
    log: Arc<InMemoryEventLog>,
    bus: B,
    balances: Repository<CurrentBalance, Arc<InMemoryEventLog>>,
}

impl<B> core::fmt::Debug for Bank<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bank")
            .field("balances", &self.balances)
            .finish_non_exhaustive()
    }
}

impl<B> Bank<B>
where
    B: EventBus<FeedMessage>,
{
    /// `balances` must read from `log`; it backs withdrawal validation.
    pub fn new(
        log: Arc<InMemoryEventLog>,
        bus: B,
        balances: Repository<CurrentBalance, Arc<InMemoryEventLog>>,
    ) -> Self {
        Self { log, bus, balances }
    }

    pub fn open_account(&self, owner: impl Into<String>) -> Result<Uuid, BankError> {
        let account_id = Uuid::now_v7();
        self.commit(
            account_id,
            &BankAccountCreated {
                account_id,
                owner: owner.into(),
            },
        )?;
        Ok(account_id)
    }

    pub fn deposit(&self, account_id: Uuid, amount: i64) -> Result<(), BankError> {
        ensure_positive(amount)?;
        self.balance(account_id)?;
        self.commit(account_id, &MoneyDeposited { account_id, amount })
            .map(drop)
    }

    pub fn withdraw(&self, account_id: Uuid, amount: i64) -> Result<(), BankError> {
        ensure_positive(amount)?;
        let balance = self.balance(account_id)?;
        if balance < amount {
            return Err(BankError::InsufficientFunds {
                account_id,
                balance,
                requested: amount,
            });
        }
        self.commit(account_id, &MoneyWithdrawn { account_id, amount })
            .map(drop)
    }

    pub fn change_owner(&self, account_id: Uuid, owner: impl Into<String>) -> Result<(), BankError> {
        self.balance(account_id)?;
        self.commit(
            account_id,
            &OwnerChanged {
                account_id,
                owner: owner.into(),
            },
        )
        .map(drop)
    }

    /// Current balance in euro cents.
    pub fn balance(&self, account_id: Uuid) -> Result<i64, BankError> {
        self.balances
            .find_by_id(&account_entity(account_id))?
            .map(|b| b.balance)
            .ok_or(BankError::UnknownAccount(account_id))
    }

    fn commit<E: DomainEvent>(&self, account_id: Uuid, event: &E) -> Result<EventRecord, BankError> {
        let record = self.log.append_typed(&account_entity(account_id), event)?;
        debug!(
            account_id = %account_id,
            seq = record.sequence_number(),
            payload_type = E::EVENT_TYPE,
            "event appended"
        );

        if let Err(err) = self.bus.publish(record.clone().into()) {
            warn!(account_id = %account_id, error = ?err, "failed to publish event on the feed");
        }
        Ok(record)
    }
}

fn ensure_positive(amount: i64) -> Result<(), BankError> {
    if amount > 0 {
        Ok(())
    } else {
        Err(BankError::InvalidAmount(amount))
    }
}
