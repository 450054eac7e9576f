//! Core engine: reconcile across sources, evaluate alert rules, poll on a
//! trading-hours cadence.

pub mod aggregator;
pub mod alerts;
pub mod scheduler;
