use net::{NetError, TopologyError};

use crate::{config::BenchConfigLoadError, experiment::ExperimentError};

/// Bad input caught before any network activity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid {name} '{value}'")]
    InvalidArgument { name: &'static str, value: String },
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("port bases {send_base}/{recv_base} cannot address {worker_count} workers")]
    PortRange {
        send_base: u16,
        recv_base: u16,
        worker_count: u32,
    },
    #[error("settings: {0}")]
    Settings(#[from] BenchConfigLoadError),
}

impl ConfigurationError {
    pub fn invalid(name: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            value: value.into(),
        }
    }
}

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIGURATION: u8 = 2;

pub trait Reportable {
    fn exit_status(&self) -> u8;
}

impl Reportable for ConfigurationError {
    fn exit_status(&self) -> u8 {
        EXIT_CONFIGURATION
    }
}

impl Reportable for NetError {
    fn exit_status(&self) -> u8 {
        EXIT_FAILURE
    }
}

impl Reportable for ExperimentError {
    fn exit_status(&self) -> u8 {
        match self {
            ExperimentError::Configuration(_) => EXIT_CONFIGURATION,
            _ => EXIT_FAILURE,
        }
    }
}

/// Exit status for an error that reached `main`.
pub fn exit_status(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<ConfigurationError>() {
        return err.exit_status();
    }
    if let Some(err) = err.downcast_ref::<ExperimentError>() {
        return err.exit_status();
    }
    if let Some(err) = err.downcast_ref::<NetError>() {
        return err.exit_status();
    }
    EXIT_FAILURE
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn configuration_errors_exit_with_two() {
        let err = anyhow::Error::new(ConfigurationError::Usage("meshbench ..."));
        assert_eq!(exit_status(&err), 2);
        let err = anyhow::Error::new(ExperimentError::Configuration(
            TopologyError::UnknownTopology("ring".into()).into(),
        ));
        assert_eq!(exit_status(&err), 2);
    }

    #[test]
    fn everything_else_exits_with_one() {
        let err = anyhow::Error::new(ExperimentError::WorkerFailed {
            worker: 3,
            return_code: 1,
        });
        assert_eq!(exit_status(&err), 1);
        let err = anyhow::Error::new(NetError::Multiplexer(std::io::Error::other("epoll")));
        assert_eq!(exit_status(&err), 1);
        assert_eq!(exit_status(&anyhow!("anything")), 1);
    }
}
