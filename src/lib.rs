//! Control plane of the mesh benchmark: settings, worker invocation and the
//! experiment orchestrator. The data plane lives in the `net` crate.
pub mod config;
pub mod error;
pub mod experiment;
pub mod invoke;
pub mod logging;
pub mod telemetry;
pub mod utils;
pub mod worker;
