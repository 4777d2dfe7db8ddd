//! Read models over bank account streams.
//!
//! Each projection is a plain value type plus a function returning its
//! [`DispatchRegistry`]. They differ in shape:
//!
//! - [`CurrentBalance`] is constructed from the creation event and updated by
//!   returning new values.
//! - [`CurrentOwner`] starts from `Default` and is updated in place.
//! - [`DepositCount`] starts from `Default` and only counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use adhoc_events::EventMeta;
use adhoc_projection::{DispatchRegistry, RegistryError};

use crate::events::{BankAccountCreated, MoneyDeposited, MoneyWithdrawn, OwnerChanged};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentBalance {
    pub account_id: Uuid,
    /// Euro cents.
    pub balance: i64,
    /// Sequence number of the last event that changed the balance.
    pub version: u64,
    pub last_modified: DateTime<Utc>,
}

impl CurrentBalance {
    fn created(e: BankAccountCreated, meta: EventMeta<'_>) -> Self {
        Self {
            account_id: e.account_id,
            balance: 0,
            version: meta.sequence_number,
            last_modified: meta.timestamp,
        }
    }

    /// Saturates at the `i64` bounds.
    fn changed_by(self, delta: i64, meta: EventMeta<'_>) -> Self {
        Self {
            balance: self.balance.saturating_add(delta),
            version: meta.sequence_number,
            last_modified: meta.timestamp,
            ..self
        }
    }

    pub fn registry() -> Result<DispatchRegistry<Self>, RegistryError> {
        DispatchRegistry::builder("current_balance")
            .constructor(Self::created)
            .update(|s: Self, e: MoneyDeposited, meta| s.changed_by(e.amount, meta))
            .update(|s: Self, e: MoneyWithdrawn, meta| s.changed_by(e.amount.saturating_neg(), meta))
            .build()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentOwner {
    pub account_id: Uuid,
    pub owner: String,
}

impl CurrentOwner {
    pub fn registry() -> Result<DispatchRegistry<Self>, RegistryError> {
        DispatchRegistry::builder("current_owner")
            .default_state()
            .update_in_place(|s: &mut Self, e: BankAccountCreated, _| {
                s.account_id = e.account_id;
                s.owner = e.owner;
            })
            .update_in_place(|s: &mut Self, e: OwnerChanged, _| s.owner = e.owner)
            .build()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositCount {
    pub deposits: u32,
    pub withdrawals: u32,
}

impl DepositCount {
    pub fn registry() -> Result<DispatchRegistry<Self>, RegistryError> {
        DispatchRegistry::builder("deposit_count")
            .default_state()
            .update(|s: Self, _: MoneyDeposited, _| Self {
                deposits: s.deposits.saturating_add(1),
                ..s
            })
            .update(|s: Self, _: MoneyWithdrawn, _| Self {
                withdrawals: s.withdrawals.saturating_add(1),
                ..s
            })
            .build()
    }
}
