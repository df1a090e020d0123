use crate::reconciler::ReconcilerOptions;
use clap::Parser;
use common::jobinstaller::{DEFAULT_IMAGE, DEFAULT_SERVICE_ACCOUNT};
use std::time::Duration;

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("invalid label '{s}', expected key=value")),
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Listen address of the metrics and health endpoints
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:9000")]
    pub bind_address: String,

    /// Only watch this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Reconcile schema-less objects instead of typed ones
    #[arg(long, env = "GENERIC_MODE")]
    pub generic: bool,

    /// Labels set on every resource before its first install
    #[arg(long = "resource-label", env = "RESOURCE_LABELS", value_delimiter = ',', value_parser = parse_label)]
    pub resource_labels: Vec<(String, String)>,

    #[arg(long, env = "INSTALLER_IMAGE", default_value = DEFAULT_IMAGE)]
    pub installer_image: String,

    #[arg(long, env = "INSTALLER_SERVICE_ACCOUNT", default_value = DEFAULT_SERVICE_ACCOUNT)]
    pub installer_service_account: String,

    /// Seconds before looking again at a running install
    #[arg(long, env = "PROGRESS_REQUEUE", default_value_t = 30)]
    pub progress_requeue: u64,

    /// Seconds between two consistency checks of a ready release
    #[arg(long, env = "RESYNC_INTERVAL", default_value_t = 15 * 60)]
    pub resync: u64,

    #[arg(long, env = "ERROR_BACKOFF", default_value_t = 5 * 60)]
    pub error_backoff: u64,

    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            resource_labels: self.resource_labels.iter().cloned().collect(),
            progress_requeue: Duration::from_secs(self.progress_requeue),
            resync: Duration::from_secs(self.resync),
            error_backoff: Duration::from_secs(self.error_backoff),
        }
    }
}
