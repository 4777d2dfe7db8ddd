//! Bank account events.
//!
//! Amounts are euro cents. The account id doubles as the event stream's entity id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use adhoc_core::EntityId;
use adhoc_events::DomainEvent;

/// Stream id of a bank account.
pub fn account_entity(account_id: Uuid) -> EntityId {
    EntityId::new(account_id.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccountCreated {
    pub account_id: Uuid,
    pub owner: String,
}

impl DomainEvent for BankAccountCreated {
    const EVENT_TYPE: &'static str = "bank.account.created";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyDeposited {
    pub account_id: Uuid,
    pub amount: i64,
}

impl DomainEvent for MoneyDeposited {
    const EVENT_TYPE: &'static str = "bank.account.money_deposited";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyWithdrawn {
    pub account_id: Uuid,
    pub amount: i64,
}

impl DomainEvent for MoneyWithdrawn {
    const EVENT_TYPE: &'static str = "bank.account.money_withdrawn";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerChanged {
    pub account_id: Uuid,
    pub owner: String,
}

impl DomainEvent for OwnerChanged {
    const EVENT_TYPE: &'static str = "bank.account.owner_changed";
}
