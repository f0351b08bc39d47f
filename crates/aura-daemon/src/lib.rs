//! Process wiring for the Aura Intervention Orchestrator daemon: config
//! load, dependency assembly, and the health/metrics surface exposed to
//! whatever thin HTTP binary eventually wraps the orchestrator core.

pub mod app;
pub mod environment;
