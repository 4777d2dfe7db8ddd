//! Dispatch tables mapping payload types to projection operations.
//!
//! A projection state type `S` declares its operations once, through
//! [`RegistryBuilder`]:
//!
//! - **construction** operations turn the first event of a stream into a fresh `S`
//! - **update** operations fold one more event into an existing `S`
//! - an optional **default constructor** is used when the first event has no
//!   construction operation (that event is then folded like any other)
//!
//! Dispatch is keyed by the record's payload type tag ([`DomainEvent::EVENT_TYPE`]).
//! Everything is validated in [`RegistryBuilder::build`]; a registry that was
//! built successfully never fails a lookup, only payload decoding can fail.
//!
//! ```ignore
//! let registry = DispatchRegistry::builder("current_balance")
//!     .constructor(|e: AccountOpened, meta| Balance::opened(e, meta))
//!     .update(|s: Balance, e: Deposited, meta| s.deposit(e.amount, meta))
//!     .update_in_place(|s: &mut Balance, e: Withdrawn, _meta| s.balance -= e.amount)
//!     .build()?;
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;

use adhoc_events::{DomainEvent, EventMeta, EventRecord};

use crate::error::{OperationKind, PayloadDecodeError, RegistryError};

type ConstructFn<S> =
    Box<dyn Fn(&EventRecord) -> Result<S, PayloadDecodeError> + Send + Sync + 'static>;
type UpdateFn<S> =
    Box<dyn Fn(S, &EventRecord) -> Result<S, PayloadDecodeError> + Send + Sync + 'static>;
type DefaultFn<S> = Box<dyn Fn() -> S + Send + Sync + 'static>;

/// How an update operation was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateConvention {
    /// `(S, E, meta) -> S`
    Immutable,
    /// `(&mut S, E, meta)`, run against the owned state value.
    InPlace,
}

/// A registered construction operation.
pub struct Constructor<S> {
    payload_type: &'static str,
    run: ConstructFn<S>,
}

impl<S> Constructor<S> {
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    pub fn construct(&self, record: &EventRecord) -> Result<S, PayloadDecodeError> {
        (self.run)(record)
    }
}

impl<S> core::fmt::Debug for Constructor<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Constructor")
            .field("payload_type", &self.payload_type)
            .finish_non_exhaustive()
    }
}

/// A registered update operation.
pub struct Updater<S> {
    payload_type: &'static str,
    convention: UpdateConvention,
    run: UpdateFn<S>,
}

impl<S> Updater<S> {
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    pub fn convention(&self) -> UpdateConvention {
        self.convention
    }

    pub fn apply(&self, state: S, record: &EventRecord) -> Result<S, PayloadDecodeError> {
        (self.run)(state, record)
    }
}

impl<S> core::fmt::Debug for Updater<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Updater")
            .field("payload_type", &self.payload_type)
            .field("convention", &self.convention)
            .finish_non_exhaustive()
    }
}

/// Validated operation tables for one projection state type.
pub struct DispatchRegistry<S> {
    name: String,
    constructors: HashMap<&'static str, Constructor<S>>,
    updaters: HashMap<&'static str, Updater<S>>,
    default_constructor: Option<DefaultFn<S>>,
}

impl<S> core::fmt::Debug for DispatchRegistry<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("name", &self.name)
            .field("constructors", &self.constructors.keys().collect::<Vec<_>>())
            .field("updaters", &self.updaters.keys().collect::<Vec<_>>())
            .field("default_constructor", &self.default_constructor.is_some())
            .finish()
    }
}

impl<S> DispatchRegistry<S>
where
    S: Send + Sync + 'static,
{
    pub fn builder(name: impl Into<String>) -> RegistryBuilder<S> {
        RegistryBuilder::new(name)
    }
}

impl<S> DispatchRegistry<S> {
    /// Projection name used in logs and error reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find_constructor(&self, payload_type: &str) -> Option<&Constructor<S>> {
        self.constructors.get(payload_type)
    }

    pub fn find_updater(&self, payload_type: &str) -> Option<&Updater<S>> {
        self.updaters.get(payload_type)
    }

    /// True iff an update operation exists for `payload_type`.
    pub fn is_relevant(&self, payload_type: &str) -> bool {
        self.updaters.contains_key(payload_type)
    }

    pub fn has_default_constructor(&self) -> bool {
        self.default_constructor.is_some()
    }

    /// Fresh state from the zero-argument construction path, if declared.
    pub fn construct_default(&self) -> Option<S> {
        self.default_constructor.as_ref().map(|f| f())
    }

    /// Run the construction operation for the record's payload type, if one is registered.
    pub fn construct(&self, record: &EventRecord) -> Option<Result<S, PayloadDecodeError>> {
        self.find_constructor(record.payload_type())
            .map(|c| c.construct(record))
    }

    /// Fold one record into `state`; records without an update operation leave it unchanged.
    pub fn apply(&self, state: S, record: &EventRecord) -> Result<S, PayloadDecodeError> {
        match self.find_updater(record.payload_type()) {
            Some(updater) => updater.apply(state, record),
            None => Ok(state),
        }
    }

    /// Payload types this projection reacts to on the live feed.
    pub fn relevant_payload_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.updaters.keys().copied()
    }
}

enum PendingUpdate<S> {
    Valid(Updater<S>),
    IllegalReturn {
        payload_type: &'static str,
        returned: &'static str,
    },
}

/// Collects operations and validates them into a [`DispatchRegistry`].
pub struct RegistryBuilder<S> {
    name: String,
    constructors: Vec<Constructor<S>>,
    updates: Vec<PendingUpdate<S>>,
    default_constructor: Option<DefaultFn<S>>,
}

fn decode<E: DomainEvent>(record: &EventRecord) -> Result<E, PayloadDecodeError> {
    record.decode::<E>().map_err(|source| PayloadDecodeError {
        payload_type: record.payload_type().to_owned(),
        source,
    })
}

impl<S> RegistryBuilder<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructors: Vec::new(),
            updates: Vec::new(),
            default_constructor: None,
        }
    }

    /// Register a construction operation for payloads of type `E`.
    pub fn constructor<E, F>(mut self, f: F) -> Self
    where
        E: DomainEvent,
        F: Fn(E, EventMeta<'_>) -> S + Send + Sync + 'static,
    {
        self.constructors.push(Constructor {
            payload_type: E::EVENT_TYPE,
            run: Box::new(move |record| Ok(f(decode::<E>(record)?, record.meta()))),
        });
        self
    }

    /// Register an update operation returning the next state.
    ///
    /// The declared return type `R` must be the state type itself; anything else
    /// makes [`build`](Self::build) fail with [`RegistryError::IllegalReturnType`].
    pub fn update<E, R, F>(mut self, f: F) -> Self
    where
        E: DomainEvent,
        R: 'static,
        F: Fn(S, E, EventMeta<'_>) -> R + Send + Sync + 'static,
    {
        if TypeId::of::<R>() != TypeId::of::<S>() {
            self.updates.push(PendingUpdate::IllegalReturn {
                payload_type: E::EVENT_TYPE,
                returned: std::any::type_name::<R>(),
            });
            return self;
        }

        let run: UpdateFn<S> = Box::new(move |state, record| {
            let next: Box<dyn Any> = Box::new(f(state, decode::<E>(record)?, record.meta()));
            match next.downcast::<S>() {
                Ok(next) => Ok(*next),
                Err(_) => unreachable!("return type equality is checked at registration"),
            }
        });
        self.updates.push(PendingUpdate::Valid(Updater {
            payload_type: E::EVENT_TYPE,
            convention: UpdateConvention::Immutable,
            run,
        }));
        self
    }

    /// Register an update operation that mutates the state in place.
    ///
    /// The operation receives the owned state value, so cached entries are never
    /// aliased.
    pub fn update_in_place<E, F>(mut self, f: F) -> Self
    where
        E: DomainEvent,
        F: Fn(&mut S, E, EventMeta<'_>) + Send + Sync + 'static,
    {
        self.updates.push(PendingUpdate::Valid(Updater {
            payload_type: E::EVENT_TYPE,
            convention: UpdateConvention::InPlace,
            run: Box::new(move |mut state, record| {
                f(&mut state, decode::<E>(record)?, record.meta());
                Ok(state)
            }),
        }));
        self
    }

    /// Declare the zero-argument construction path.
    pub fn default_constructor<F>(mut self, f: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.default_constructor = Some(Box::new(f));
        self
    }

    /// Use `S::default()` as the zero-argument construction path.
    pub fn default_state(self) -> Self
    where
        S: Default,
    {
        self.default_constructor(S::default)
    }

    /// Validate and freeze the operation tables.
    ///
    /// Update operations are checked first (in registration order), then
    /// construction operations, then the "nothing registered" case.
    pub fn build(self) -> Result<DispatchRegistry<S>, RegistryError> {
        let projection = self.name;

        let mut updaters = HashMap::with_capacity(self.updates.len());
        for pending in self.updates {
            let updater = match pending {
                PendingUpdate::Valid(updater) => updater,
                PendingUpdate::IllegalReturn {
                    payload_type,
                    returned,
                } => {
                    return Err(RegistryError::IllegalReturnType {
                        projection,
                        payload_type: payload_type.to_owned(),
                        returned,
                        expected: std::any::type_name::<S>(),
                    });
                }
            };
            if updaters.contains_key(updater.payload_type) {
                return Err(RegistryError::DuplicateHandler {
                    projection,
                    kind: OperationKind::Update,
                    payload_type: updater.payload_type.to_owned(),
                });
            }
            updaters.insert(updater.payload_type, updater);
        }

        let mut constructors = HashMap::with_capacity(self.constructors.len());
        for constructor in self.constructors {
            if constructors.contains_key(constructor.payload_type) {
                return Err(RegistryError::DuplicateHandler {
                    projection,
                    kind: OperationKind::Construction,
                    payload_type: constructor.payload_type.to_owned(),
                });
            }
            constructors.insert(constructor.payload_type, constructor);
        }

        if constructors.is_empty() && updaters.is_empty() {
            return Err(RegistryError::NoHandlersFound { projection });
        }

        tracing::debug!(
            projection = %projection,
            constructors = constructors.len(),
            updaters = updaters.len(),
            default_constructor = self.default_constructor.is_some(),
            "dispatch registry built"
        );

        Ok(DispatchRegistry {
            name: projection,
            constructors,
            updaters,
            default_constructor: self.default_constructor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        AccountOpened, Balance, Deposited, Renamed, Withdrawn, balance_registry, record,
    };

    #[test]
    fn lookups_follow_registered_payload_types() {
        let registry = balance_registry();

        assert!(registry.find_constructor(AccountOpened::EVENT_TYPE).is_some());
        assert!(registry.find_constructor(Deposited::EVENT_TYPE).is_none());
        assert!(registry.is_relevant(Deposited::EVENT_TYPE));
        assert!(registry.is_relevant(Withdrawn::EVENT_TYPE));
        assert!(!registry.is_relevant(AccountOpened::EVENT_TYPE));
        assert!(!registry.is_relevant(Renamed::EVENT_TYPE));
        assert_eq!(
            registry
                .find_updater(Withdrawn::EVENT_TYPE)
                .map(Updater::convention),
            Some(UpdateConvention::InPlace)
        );
    }

    #[test]
    fn apply_uses_both_conventions_and_skips_unknown_payloads() {
        let registry = balance_registry();
        let opened = record("a", 0, &AccountOpened { owner: "Alice".into() });
        let state = registry.construct(&opened).unwrap().unwrap();
        assert!(
            registry
                .construct(&record("a", 1, &Deposited { amount: 1 }))
                .is_none()
        );

        let state = registry
            .apply(state, &record("a", 1, &Deposited { amount: 100 }))
            .unwrap();
        let state = registry
            .apply(state, &record("a", 2, &Withdrawn { amount: 30 }))
            .unwrap();
        let state = registry
            .apply(state, &record("a", 3, &Renamed { owner: "Bob".into() }))
            .unwrap();

        assert_eq!(state.balance, 70);
        assert_eq!(state.version, 2);
    }

    #[test]
    fn duplicate_construction_operations_fail_the_build() {
        let err = DispatchRegistry::<Balance>::builder("dup")
            .constructor(|e: AccountOpened, m| Balance::opened(e, m))
            .constructor(|e: AccountOpened, m| Balance::opened(e, m))
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::DuplicateHandler {
                projection: "dup".into(),
                kind: OperationKind::Construction,
                payload_type: AccountOpened::EVENT_TYPE.into(),
            }
        );
    }

    #[test]
    fn duplicate_update_operations_fail_across_conventions() {
        let err = DispatchRegistry::<Balance>::builder("dup")
            .update(|s: Balance, e: Deposited, _m| s.with_delta(e.amount))
            .update_in_place(|s: &mut Balance, e: Deposited, _m| s.balance += e.amount)
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            RegistryError::DuplicateHandler { kind: OperationKind::Update, .. }
        ));
    }

    #[test]
    fn update_returning_another_type_is_illegal() {
        let err = DispatchRegistry::<Balance>::builder("illegal")
            .constructor(|e: AccountOpened, m| Balance::opened(e, m))
            .update(|s: Balance, e: Deposited, _m| s.balance + e.amount)
            .build()
            .unwrap_err();

        match err {
            RegistryError::IllegalReturnType {
                payload_type,
                returned,
                ..
            } => {
                assert_eq!(payload_type, Deposited::EVENT_TYPE);
                assert_eq!(returned, "i64");
            }
            other => panic!("expected IllegalReturnType, got {other:?}"),
        }
    }

    #[test]
    fn registry_without_operations_is_rejected() {
        let err = DispatchRegistry::<Balance>::builder("empty")
            .default_state()
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::NoHandlersFound {
                projection: "empty".into()
            }
        );
    }

    #[test]
    fn mismatched_payload_surfaces_decode_error() {
        let registry = balance_registry();
        let bogus = EventRecord::new(
            "a".into(),
            1,
            Deposited::EVENT_TYPE,
            serde_json::json!({ "amount": "lots" }),
            chrono::Utc::now(),
        );
        let err = registry.apply(Balance::default(), &bogus).unwrap_err();
        assert_eq!(err.payload_type, Deposited::EVENT_TYPE);
    }
}
