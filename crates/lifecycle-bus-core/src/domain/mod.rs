//! Domain layer contracts shared by the HRMS adapters.
//!
//! Adapters declare resilience requirements (retry budget, circuit breaker
//! thresholds) as business facts about the upstream system they talk to,
//! rather than the infrastructure layer imposing one policy on everyone.

pub mod resilience;

pub use resilience::*;
