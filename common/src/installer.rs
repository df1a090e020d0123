use crate::{InstallInfo, Result};
use async_trait::async_trait;

/// Performs the install and uninstall of a declared chart.
///
/// Implementations must not block until the release settles: an action that
/// is still running reports `Ok(false)` and is asked again on a later pass.
/// Any error only fails the current pass.
#[async_trait]
pub trait Installer: Send + Sync {
    /// `Ok(true)` once the release is installed and ready
    async fn install(&self, info: &InstallInfo) -> Result<bool>;

    /// `Ok(true)` once nothing of the release is left on the cluster
    async fn uninstall(&self, info: &InstallInfo) -> Result<bool>;

    /// Consistency check of a ready release. `Ok(false)` asks for a reinstall.
    async fn verify(&self, _info: &InstallInfo) -> Result<bool> {
        Ok(true)
    }
}
