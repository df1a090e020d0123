use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("K8s error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Invalid custom resource object type for reconciliation {0}")]
    TypeMismatch(String),

    #[error("Cannot build install information: {0}")]
    BuildError(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict while updating {0}")]
    Conflict(String),

    #[error("Installer error: {0}")]
    Installer(String),

    #[error("Error: {0}")]
    Other(String),
}
impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::SerializationError(_) => "serialization",
            Error::KubeError(_) => "kube",
            Error::TypeMismatch(_) => "type_mismatch",
            Error::BuildError(_) => "build",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Installer(_) => "installer",
            Error::Other(_) => "other",
        }
        .to_string()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod accessor;
pub mod chartinstall;
pub mod context;
pub mod finalizer;
pub mod flags;
pub mod installer;
pub mod installinfo;
pub mod jobinstaller;
pub mod k8smock;
pub mod store;
pub use accessor::CustomObject;
pub use chartinstall::{ChartInstall, ChartInstallSpec, ChartInstallStatus, State};
pub use context::get_client_name;
pub use installer::Installer;
pub use installinfo::{InstallInfo, InstallInfoBuilder};
pub use store::{ResourceKey, ResourceStore};
