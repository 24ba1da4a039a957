use std::time::Duration;

use log::{debug, info, warn};

use crate::{
    error::{ConnectionError, Stage},
    sock::{Activity, Role},
};

pub struct NetLogger;

impl NetLogger {
    pub fn opens_issued(own_id: u32, count: usize) {
        debug!("worker {own_id}: {count} active opens issued");
    }

    pub fn established(own_id: u32, peer: u32, role: Role, activity: Activity) {
        debug!("worker {own_id}: peer {peer} ({role}) established, {activity:?}");
    }

    /// Bind or connect never completed for this peer.
    pub fn connect_failed(own_id: u32, err: &ConnectionError) {
        warn!("worker {own_id}: peer connect failed: {err}");
    }

    /// An established connection hit an I/O error or EOF.
    pub fn peer_died(own_id: u32, err: &ConnectionError) {
        warn!("worker {own_id}: peer died: {err}");
    }

    pub fn connection_lost(own_id: u32, err: &ConnectionError) {
        match err.stage {
            Stage::Bind | Stage::Connect => Self::connect_failed(own_id, err),
            Stage::Read | Stage::Write => Self::peer_died(own_id, err),
        }
    }

    pub fn run_finished(own_id: u32, elapsed: Duration, established: usize, lost: usize) {
        info!(
            "worker {own_id}: run over after {elapsed:?}, {established} connections established, {lost} lost"
        );
    }
}

/// Collects every record at or above `warn` for assertions in tests.
#[cfg(test)]
pub(crate) mod capture {
    use std::sync::{Mutex, Once};

    use log::{Level, LevelFilter, Log, Metadata, Record};

    static RECORDS: Mutex<Vec<String>> = Mutex::new(Vec::new());
    static INSTALL: Once = Once::new();

    struct Capture;

    impl Log for Capture {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= Level::Warn
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                RECORDS
                    .lock()
                    .unwrap()
                    .push(format!("{} {}", record.level(), record.args()));
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: Capture = Capture;

    pub(crate) fn install() {
        INSTALL.call_once(|| {
            log::set_logger(&LOGGER).unwrap();
            log::set_max_level(LevelFilter::Warn);
        });
    }

    /// Captured lines containing `needle`.
    pub(crate) fn lines_with(needle: &str) -> Vec<String> {
        RECORDS
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains(needle))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    fn failure(peer: u32, stage: Stage) -> ConnectionError {
        ConnectionError {
            peer,
            role: Role::Recv,
            stage,
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        }
    }

    #[test]
    fn lost_connections_are_warnings_named_by_stage() {
        capture::install();
        NetLogger::connection_lost(901, &failure(4, Stage::Connect));
        NetLogger::connection_lost(901, &failure(5, Stage::Read));

        let lines = capture::lines_with("worker 901:");
        assert_eq!(lines.len(), 2, "{lines:?}");
        assert!(lines[0].starts_with("WARN worker 901: peer connect failed: peer 4 (recv) connect failed"));
        assert!(lines[1].starts_with("WARN worker 901: peer died: peer 5 (recv) read failed"));
    }
}
