use std::{
    collections::HashMap,
    fs::{self, File},
    io::prelude::*,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{info, warn};
use net::PortScheme;
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "MESHBENCH_CONFIG";
pub const AUTH_TOKEN_ENV: &str = "MESHBENCH_AUTH_TOKEN";

/// Top-level configuration, loaded from `settings.toml`.
///
/// The command lines of both binaries stay positional; this only covers what
/// they leave out.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BenchConfig {
    #[serde(default)]
    pub invoke: InvokeConfig,

    #[serde(default)]
    pub data_plane: DataPlaneConfig,

    #[serde(default)]
    pub rendezvous: RendezvousConfig,

    #[serde(flatten)]
    pub other_fields: HashMap<String, toml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvokeBackend {
    /// Synchronous Lambda `Invoke` over HTTPS.
    #[default]
    Lambda,
    /// Local subprocess per worker.
    Process,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InvokeConfig {
    pub backend: InvokeBackend,
    pub region: String,
    pub function: String,
    /// Overrides `https://lambda.<region>.amazonaws.com`.
    pub endpoint: Option<String>,
    /// Worker executable for the process backend.
    pub program: String,
    /// Simultaneous sessions; 0 launches every worker at once.
    pub max_in_flight: usize,
    pub timeout_secs: u64,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            backend: InvokeBackend::Lambda,
            region: "us-west-1".to_string(),
            function: "tempf".to_string(),
            endpoint: None,
            program: "meshbench-worker".to_string(),
            max_in_flight: 0,
            timeout_secs: 900,
        }
    }
}

impl InvokeConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://lambda.{}.amazonaws.com", self.region))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DataPlaneConfig {
    pub send_base: u16,
    pub recv_base: u16,
    /// Size of the pseudo-random buffer every write draws from.
    pub payload_bytes: usize,
    /// Size of the receive buffer reused by every read.
    pub scratch_bytes: usize,
    pub log_interval_ms: u64,
    /// Shuffle the order connections to peers are opened in.
    pub shuffle_peers: bool,
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            send_base: net::BASE_SEND,
            recv_base: net::BASE_RECV,
            payload_bytes: net::engine::DEFAULT_PAYLOAD_BYTES,
            scratch_bytes: net::engine::DEFAULT_SCRATCH_BYTES,
            log_interval_ms: 1000,
            shuffle_peers: true,
        }
    }
}

impl DataPlaneConfig {
    pub fn ports(&self) -> PortScheme {
        PortScheme::new(self.send_base, self.recv_base)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RendezvousMode {
    /// Ask the coordinator service named on the command line.
    #[default]
    Coordinator,
    /// Every worker on 127.0.0.1, grouped by block.
    Loopback,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RendezvousConfig {
    pub mode: RendezvousMode,
    pub timeout_secs: Option<u64>,
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self, BenchConfigLoadError> {
        let raw = fs::read_to_string(path).map_err(BenchConfigLoadError::Io)?;
        let config: Self = toml::from_str(&raw).map_err(BenchConfigLoadError::Parse)?;

        for field in &config.other_fields {
            warn!(
                "Unknown configuration '{}' with value {:?}",
                field.0, field.1
            );
        }

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let config_str = toml::to_string(&self)?;
        let mut file = File::create(path)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    /// `$MESHBENCH_CONFIG`, else `settings.toml` in the working directory.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        match dotenvy::var(CONFIG_ENV) {
            Ok(path) => Ok(PathBuf::from(path)),
            Err(_) => Ok(std::env::current_dir()?.join("settings.toml")),
        }
    }

    /// Loads `path`, writing defaults back when it is missing and filling in
    /// absent fields when it exists. A file that does not parse is an error.
    pub fn load_or_default(path: &Path) -> Result<Self, BenchConfigLoadError> {
        match Self::load(path) {
            Ok(config) => {
                // Save config to fill missing fields
                let _ = config.save(path);
                Ok(config)
            }
            Err(BenchConfigLoadError::Io(_)) => {
                info!("No config at {}, using defaults", path.display());
                let default_config = Self::default();
                let _ = default_config.save(path);
                Ok(default_config)
            }
            Err(err) => Err(err),
        }
    }

    /// Like [`BenchConfig::load_or_default`] but never writes. Workers may
    /// run on a read-only filesystem.
    pub fn load_existing(path: &Path) -> Result<Self, BenchConfigLoadError> {
        match Self::load(path) {
            Err(BenchConfigLoadError::Io(_)) => Ok(Self::default()),
            other => other,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BenchConfigLoadError {
    #[error("Could not open config")]
    Io(#[from] std::io::Error),
    #[error("Could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("meshbench-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn defaults_match_the_reference_deployment() {
        let config = BenchConfig::default();
        assert_eq!(config.invoke.backend, InvokeBackend::Lambda);
        assert_eq!(config.invoke.endpoint(), "https://lambda.us-west-1.amazonaws.com");
        assert_eq!(config.invoke.function, "tempf");
        assert_eq!(config.data_plane.ports(), PortScheme::new(18000, 14000));
        assert_eq!(config.data_plane.payload_bytes, 128 * 1024);
        assert_eq!(config.data_plane.scratch_bytes, 1024 * 1024);
        assert_eq!(config.data_plane.log_interval(), Duration::from_secs(1));
        assert_eq!(config.rendezvous.mode, RendezvousMode::Coordinator);
    }

    #[test]
    fn partial_file_keeps_defaults_and_reports_unknown_keys() {
        let dir = scratch_dir("partial");
        let path = dir.join("settings.toml");
        fs::write(
            &path,
            "mystery = 1\n[invoke]\nbackend = \"process\"\nmax_in_flight = 4\n[rendezvous]\nmode = \"loopback\"\n",
        )
        .unwrap();

        let config = BenchConfig::load_or_default(&path).unwrap();
        assert_eq!(config.invoke.backend, InvokeBackend::Process);
        assert_eq!(config.invoke.max_in_flight, 4);
        assert_eq!(config.invoke.region, "us-west-1");
        assert_eq!(config.rendezvous.mode, RendezvousMode::Loopback);
        assert!(config.other_fields.contains_key("mystery"));

        // missing fields were written back
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("send_base = 18000"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_file_writes_defaults() {
        let dir = scratch_dir("missing");
        let path = dir.join("settings.toml");
        let config = BenchConfig::load_or_default(&path).unwrap();
        assert_eq!(config.invoke.timeout(), Duration::from_secs(900));
        assert!(path.exists());
        assert!(BenchConfig::load(&path).is_ok());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = scratch_dir("broken");
        let path = dir.join("settings.toml");
        fs::write(&path, "[invoke\nbackend = ").unwrap();
        assert!(matches!(
            BenchConfig::load_or_default(&path),
            Err(BenchConfigLoadError::Parse(_))
        ));
        fs::write(&path, "[invoke]\nbackend = \"carrier-pigeon\"\n").unwrap();
        assert!(BenchConfig::load(&path).is_err());
        fs::remove_dir_all(dir).unwrap();
    }
}
