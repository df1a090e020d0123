pub use common::{Error, Result};

/// Command line and environment configuration
pub mod config;
pub use config::Config;

/// Kubernetes events published on state transitions
pub mod events;

/// The reconciliation state machine
pub mod reconciler;
pub use reconciler::{ManifestReconciler, ReconcilerOptions};

/// State machinery for kube, as exposeable to actix
pub mod manager;
pub use manager::Manager;

/// Metrics
mod metrics;
pub use metrics::Metrics;
