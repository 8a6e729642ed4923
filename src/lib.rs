//! # lifecycle-bus
//!
//! The event ingestion and distribution backbone for employee lifecycle
//! events: a webhook gateway and a set of HRMS pollers that normalize
//! heterogeneous upstream events into canonical lifecycle events, sitting on
//! top of a Kafka-shaped event bus (typed producer, consumer with
//! retry/DLQ, a dead-letter reprocessor, and correlation/trace propagation).
//!
//! This crate is a thin re-export of [`lifecycle_bus_core`]; the binary in
//! `src/bin/lifecycle_bus.rs` wires the pieces together into one process.

pub use lifecycle_bus_core::*;
