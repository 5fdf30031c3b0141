//! patchruled.toml configuration.
//!
//! Values come from the file first; any flag or `PATCHRULE_*` environment
//! variable then overrides the matching key.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use patchrule_api::duration;
use patchrule_controller::{
    ControllerConfig, DEFAULT_FIELD_MANAGER, PrometheusEngine, ReconcilerConfig,
};
use patchrule_query::TlsConfig;
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Directory holding the store file.
    pub data_dir: PathBuf,
    pub field_manager: String,
    pub probe_addr: SocketAddr,
    pub metrics_addr: SocketAddr,
    pub concurrent: usize,
    /// Only drive rules in these namespaces. Empty means all.
    pub namespaces: Vec<String>,
    #[serde(with = "duration")]
    pub resync_interval: Duration,
    #[serde(with = "duration")]
    pub error_requeue: Duration,
    #[serde(with = "duration")]
    pub query_timeout: Duration,
    /// PEM bundle of extra CAs trusted for `https` query addresses.
    pub query_ca_file: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/patchrule"),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 9557)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9556)),
            concurrent: 2,
            namespaces: Vec::new(),
            resync_interval: Duration::from_secs(10),
            error_requeue: Duration::from_secs(5),
            query_timeout: Duration::from_secs(30),
            query_ca_file: None,
            log_format: LogFormat::Text,
        }
    }
}

/// Command-line and environment overrides for [`DaemonConfig`].
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Directory holding the store file.
    #[arg(long, global = true, env = "PATCHRULE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Identity recorded on patched resources.
    #[arg(long, global = true, env = "PATCHRULE_FIELD_MANAGER")]
    pub field_manager: Option<String>,

    /// Address of the health probe server.
    #[arg(long, global = true, env = "PATCHRULE_PROBE_ADDR")]
    pub probe_addr: Option<SocketAddr>,

    /// Address of the Prometheus metrics server.
    #[arg(long, global = true, env = "PATCHRULE_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Maximum concurrent reconciles.
    #[arg(long, global = true, env = "PATCHRULE_CONCURRENT")]
    pub concurrent: Option<usize>,

    /// Comma-separated namespaces to watch.
    #[arg(long, global = true, env = "PATCHRULE_NAMESPACES", value_delimiter = ',')]
    pub namespaces: Option<Vec<String>>,

    /// How often rules are re-listed, e.g. `10s`.
    #[arg(long, global = true, env = "PATCHRULE_RESYNC_INTERVAL", value_parser = duration::parse)]
    pub resync_interval: Option<Duration>,

    /// Retry delay after a failed reconcile, e.g. `5s`.
    #[arg(long, global = true, env = "PATCHRULE_ERROR_REQUEUE", value_parser = duration::parse)]
    pub error_requeue: Option<Duration>,

    /// Timeout for one Prometheus query, e.g. `30s`.
    #[arg(long, global = true, env = "PATCHRULE_QUERY_TIMEOUT", value_parser = duration::parse)]
    pub query_timeout: Option<Duration>,

    /// PEM file with extra CAs for `https` query addresses.
    #[arg(long, global = true, env = "PATCHRULE_QUERY_CA_FILE")]
    pub query_ca_file: Option<PathBuf>,

    #[arg(long, global = true, env = "PATCHRULE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if given, otherwise start from defaults, then apply
    /// `overrides`.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)
                .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?,
            None => Self::default(),
        };
        config.apply(overrides);
        anyhow::ensure!(
            config.metrics_addr != config.probe_addr,
            "metrics_addr and probe_addr must differ"
        );
        anyhow::ensure!(config.concurrent > 0, "concurrent must be at least 1");
        anyhow::ensure!(
            !config.resync_interval.is_zero(),
            "resync_interval must be greater than zero"
        );
        Ok(config)
    }

    fn apply(&mut self, o: &Overrides) {
        if let Some(v) = &o.data_dir {
            self.data_dir = v.clone();
        }
        if let Some(v) = &o.field_manager {
            self.field_manager = v.clone();
        }
        if let Some(v) = o.probe_addr {
            self.probe_addr = v;
        }
        if let Some(v) = o.metrics_addr {
            self.metrics_addr = v;
        }
        if let Some(v) = o.concurrent {
            self.concurrent = v;
        }
        if let Some(v) = &o.namespaces {
            self.namespaces = v.iter().filter(|n| !n.is_empty()).cloned().collect();
        }
        if let Some(v) = o.resync_interval {
            self.resync_interval = v;
        }
        if let Some(v) = o.error_requeue {
            self.error_requeue = v;
        }
        if let Some(v) = o.query_timeout {
            self.query_timeout = v;
        }
        if let Some(v) = &o.query_ca_file {
            self.query_ca_file = Some(v.clone());
        }
        if let Some(v) = o.log_format {
            self.log_format = v;
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("patchrule.redb")
    }

    /// Query engine with the configured timeout, trusting `query_ca_file`
    /// on top of the Mozilla roots when set.
    pub fn query_engine(&self) -> anyhow::Result<PrometheusEngine> {
        let engine = PrometheusEngine::new(self.query_timeout);
        let Some(path) = &self.query_ca_file else {
            return Ok(engine);
        };
        let pem = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let certs = rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("bad PEM in {}: {e}", path.display()))?;
        anyhow::ensure!(!certs.is_empty(), "no certificates in {}", path.display());
        let tls = TlsConfig::with_extra_roots(certs)?;
        Ok(engine.with_tls(tls))
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            field_manager: self.field_manager.clone(),
        }
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            concurrent: self.concurrent,
            resync_interval: self.resync_interval,
            error_requeue: self.error_requeue,
            namespaces: self.namespaces.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.field_manager, "patchrule-controller");
        assert_eq!(config.probe_addr.port(), 9557);
        assert_eq!(config.metrics_addr.port(), 9556);
        assert_eq!(config.query_ca_file, None);
        assert_eq!(config.concurrent, 2);
        assert_eq!(config.resync_interval, Duration::from_secs(10));
        assert_eq!(config.error_requeue, Duration::from_secs(5));
        assert_eq!(config.query_timeout, Duration::from_secs(30));
    }

    #[test]
    fn parse_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
data_dir = "/tmp/patchrule"
namespaces = ["prod", "staging"]
resync_interval = "1m"
log_format = "json"
"#
        )
        .unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/patchrule"));
        assert_eq!(config.namespaces, vec!["prod", "staging"]);
        assert_eq!(config.resync_interval, Duration::from_secs(60));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.concurrent, 2);
        assert_eq!(config.store_path(), PathBuf::from("/tmp/patchrule/patchrule.redb"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "webhook_port = 9443").unwrap();
        assert!(DaemonConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn overrides_win_over_file() {
        let overrides = Overrides {
            field_manager: Some("ops".to_string()),
            namespaces: Some(vec!["a".to_string(), String::new()]),
            error_requeue: Some(Duration::from_secs(1)),
            ..Overrides::default()
        };
        let config = DaemonConfig::load(None, &overrides).unwrap();
        assert_eq!(config.field_manager, "ops");
        assert_eq!(config.namespaces, vec!["a"]);
        assert_eq!(config.controller().error_requeue, Duration::from_secs(1));
        assert_eq!(config.reconciler().field_manager, "ops");
    }

    #[test]
    fn metrics_addr_from_file_and_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "metrics_addr = \"127.0.0.1:9600\"").unwrap();
        let config = DaemonConfig::load(Some(file.path()), &Overrides::default()).unwrap();
        assert_eq!(config.metrics_addr, SocketAddr::from(([127, 0, 0, 1], 9600)));

        let overrides = Overrides {
            metrics_addr: Some(SocketAddr::from(([127, 0, 0, 1], 9700))),
            ..Overrides::default()
        };
        let config = DaemonConfig::load(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.metrics_addr.port(), 9700);
    }

    #[test]
    fn shared_metrics_and_health_address_is_rejected() {
        let overrides = Overrides {
            metrics_addr: Some(SocketAddr::from(([0, 0, 0, 0], 9557))),
            ..Overrides::default()
        };
        assert!(DaemonConfig::load(None, &overrides).is_err());
    }

    #[test]
    fn query_ca_file_without_certificates_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a pem bundle").unwrap();
        let config = DaemonConfig {
            query_ca_file: Some(file.path().to_path_buf()),
            ..DaemonConfig::default()
        };
        assert!(config.query_engine().is_err());
        assert!(DaemonConfig::default().query_engine().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let overrides = Overrides {
            concurrent: Some(0),
            ..Overrides::default()
        };
        assert!(DaemonConfig::load(None, &overrides).is_err());
    }
}
