//! Correlation power analysis of HMAC over SHA-2
//!
//! This library simulates the leakage of the two HMAC compression calls and
//! recovers the inner and outer hash states from it, escalating the number of
//! traces until a candidate verifies.

pub mod attack;
pub mod compression;
pub mod error;
pub mod key;
pub mod leakage;
pub mod math;
pub mod report;

pub use attack::{AttackConfig, AttackReport, HmacAttack, HypothesisOracle};
pub use compression::{HashState, Variant};
pub use error::AttackError;
pub use key::Key;
