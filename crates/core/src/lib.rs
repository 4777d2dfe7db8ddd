//! `adhoc-core`: identity and time primitives shared by the projection engine.
//!
//! No storage, transport or logging dependencies.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::IdError;
pub use id::EntityId;
