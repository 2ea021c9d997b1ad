//! Protocol core for the plan-session peer
//!
//! Subject addressing, wire records and the JSON codec shared by every
//! participant of a `plan.session.<id>.*` session.

pub mod clock;
pub mod codec;
pub mod domain;
pub mod error;

pub use clock::Clock;
pub use domain::*;
pub use error::{CoreError, Result};
