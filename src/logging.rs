use std::{fmt::Display, net::SocketAddr, time::Duration};

use env_logger::{Builder, Env};
use log::{debug, error, info, warn};

/// Level used when `RUST_LOG` is unset. Peer-loss notices are warnings and
/// belong on worker stderr.
const DEFAULT_FILTER: &str = "warn";

pub struct BenchLogger;

impl BenchLogger {
    pub fn init() {
        let mut builder = Self::builder(Env::default());
        if cfg!(debug_assertions) {
            builder
                .filter_level(log::LevelFilter::Debug)
                .parse_default_env();
        }
        let _ = builder.try_init();
    }

    fn builder(env: Env<'_>) -> Builder {
        Builder::from_env(env.default_filter_or(DEFAULT_FILTER))
    }

    pub fn settings_loaded(path: &std::path::Path) {
        debug!("Settings loaded from {}", path.display());
    }

    pub fn experiment_started(worker_count: u32, topology: &dyn Display, block_dim: u32) {
        info!("Starting {worker_count} workers, topology {topology} (block dim {block_dim})");
    }

    pub fn invocation_started(worker: u32, in_flight: usize) {
        debug!("Invoking worker {worker} ({in_flight} in flight)");
    }

    pub fn invocation_finished(worker: u32, return_code: i32, elapsed: Duration) {
        info!("Worker {worker} returned {return_code} after {elapsed:?}");
    }

    pub fn invocation_failed(worker: u32, err: &dyn Display) {
        error!("Worker {worker} failed: {err}");
    }

    pub fn experiment_aborted(completed: u32, worker_count: u32, err: &dyn Display) {
        error!("Experiment aborted after {completed}/{worker_count} workers: {err}");
    }

    pub fn experiment_finished(worker_count: u32, elapsed: Duration) {
        info!("All {worker_count} workers completed in {elapsed:?}");
    }

    pub fn unparsed_summary(worker: u32) {
        debug!("Worker {worker} reported no byte summary");
    }

    pub fn rendezvous_resolved(own_id: u32, peers: usize, coordinator: Option<&SocketAddr>) {
        match coordinator {
            Some(addr) => info!("Worker {own_id}: {peers} peers from coordinator {addr}"),
            None => info!("Worker {own_id}: {peers} loopback peers"),
        }
    }

    pub fn telemetry_failed(err: &dyn Display) {
        warn!("Telemetry disabled: {err}");
    }

    pub fn interrupted() {
        warn!("Received signal, abandoning in-flight workers");
    }
}

#[cfg(test)]
mod tests {
    use log::LevelFilter;

    use super::*;

    #[test]
    fn warnings_pass_without_rust_log() {
        let logger = BenchLogger::builder(Env::new().filter("MESHBENCH_TEST_UNSET_FILTER")).build();
        assert_eq!(logger.filter(), LevelFilter::Warn);
    }

    #[test]
    fn rust_log_still_wins() {
        std::env::set_var("MESHBENCH_TEST_QUIET_FILTER", "error");
        let logger = BenchLogger::builder(Env::new().filter("MESHBENCH_TEST_QUIET_FILTER")).build();
        assert_eq!(logger.filter(), LevelFilter::Error);
    }
}
