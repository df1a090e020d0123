//! Per-pass context handed to an [`Installer`](crate::Installer).
use crate::{CustomObject, Error, ResourceKey, Result, flags::parse_flags};
use kube::{Client, ResourceExt, api::DynamicObject};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Readiness predicate: declared base resource and the objects observed on the cluster
pub type ReadyCheck = Arc<dyn Fn(&DynamicObject, &[DynamicObject]) -> bool + Send + Sync>;

pub fn always_ready() -> ReadyCheck {
    Arc::new(|_declared: &DynamicObject, _observed: &[DynamicObject]| true)
}

#[derive(Clone, Debug)]
pub struct ChartInfo {
    pub chart_path: String,
    pub release_name: String,
    pub flags: Map<String, Value>,
}

#[derive(Clone)]
pub struct RemoteInfo {
    pub client: Client,
}

#[derive(Clone, Debug)]
pub struct ResourceInfo {
    pub key: ResourceKey,
    /// Generic form of the reconciled resource, whatever representation it came in
    pub base_resource: DynamicObject,
}

/// Built fresh for every reconciliation pass, never stored
#[derive(Clone)]
pub struct InstallInfo {
    pub ctx: CancellationToken,
    pub namespace: String,
    pub chart: ChartInfo,
    pub remote: RemoteInfo,
    pub resource: ResourceInfo,
    pub check: ReadyCheck,
}

impl InstallInfo {
    pub fn is_ready(&self, observed: &[DynamicObject]) -> bool {
        (self.check)(&self.resource.base_resource, observed)
    }
}

#[derive(Clone)]
pub struct InstallInfoBuilder {
    client: Client,
    check: ReadyCheck,
}

impl InstallInfoBuilder {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            check: always_ready(),
        }
    }

    #[must_use]
    pub fn with_check(mut self, check: ReadyCheck) -> Self {
        self.check = check;
        self
    }

    pub fn build<K: CustomObject>(
        &self,
        ctx: CancellationToken,
        resource: &K,
        chart_path: &str,
        release_name: &str,
        chart_flags: &str,
    ) -> Result<InstallInfo> {
        if chart_path.is_empty() {
            return Err(Error::BuildError(format!(
                "{}: empty chart path",
                ResourceKey::from_resource(resource)
            )));
        }
        let flags = parse_flags(chart_flags)?;
        self.assemble(ctx, resource, chart_path, release_name, flags)
    }

    /// Removing a release only needs its name, so neither the chart locator
    /// nor the flags are validated here.
    pub fn build_for_teardown<K: CustomObject>(
        &self,
        ctx: CancellationToken,
        resource: &K,
        chart_path: &str,
        release_name: &str,
    ) -> Result<InstallInfo> {
        self.assemble(ctx, resource, chart_path, release_name, Map::new())
    }

    fn assemble<K: CustomObject>(
        &self,
        ctx: CancellationToken,
        resource: &K,
        chart_path: &str,
        release_name: &str,
        flags: Map<String, Value>,
    ) -> Result<InstallInfo> {
        let namespace = resource
            .namespace()
            .ok_or_else(|| Error::BuildError(format!("{} has no namespace", resource.name_any())))?;
        let base_resource = resource
            .to_generic()
            .map_err(|e| Error::BuildError(format!("unable to convert resource: {e}")))?;
        Ok(InstallInfo {
            ctx,
            chart: ChartInfo {
                chart_path: chart_path.to_string(),
                release_name: release_name.to_string(),
                flags,
            },
            remote: RemoteInfo {
                client: self.client.clone(),
            },
            resource: ResourceInfo {
                key: ResourceKey::from_resource(resource),
                base_resource,
            },
            check: self.check.clone(),
            namespace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChartInstall, ChartInstallSpec, k8smock::test_client};

    fn resource(flags: &str) -> ChartInstall {
        let mut ci = ChartInstall::new("web", ChartInstallSpec {
            chart_path: "oci://registry/charts/web".to_string(),
            release_name: "web".to_string(),
            chart_flags: flags.to_string(),
        });
        ci.metadata.namespace = Some("apps".to_string());
        ci
    }

    #[tokio::test]
    async fn test_build_from_typed_and_generic() {
        let builder = InstallInfoBuilder::new(test_client());
        let ci = resource("replicas=2");
        let typed = builder
            .build(CancellationToken::new(), &ci, "oci://registry/charts/web", "web", "replicas=2")
            .unwrap();
        let generic = builder
            .build(
                CancellationToken::new(),
                &ci.to_generic().unwrap(),
                "oci://registry/charts/web",
                "web",
                "replicas=2",
            )
            .unwrap();
        assert_eq!(typed.namespace, "apps");
        assert_eq!(typed.resource.key.to_string(), "apps/web");
        assert_eq!(typed.chart.flags["replicas"], 2);
        assert_eq!(typed.resource.base_resource.data, generic.resource.base_resource.data);
        assert_eq!(generic.resource.key, typed.resource.key);
    }

    #[tokio::test]
    async fn test_build_rejects_bad_flags() {
        let builder = InstallInfoBuilder::new(test_client());
        let ci = resource("broken");
        let res = builder.build(CancellationToken::new(), &ci, "charts/web", "web", "broken");
        assert!(matches!(res, Err(Error::BuildError(_))));
    }

    #[tokio::test]
    async fn test_build_requires_namespace() {
        let builder = InstallInfoBuilder::new(test_client());
        let mut ci = resource("");
        ci.metadata.namespace = None;
        let res = builder.build(CancellationToken::new(), &ci, "charts/web", "web", "");
        assert!(matches!(res, Err(Error::BuildError(_))));
    }

    #[tokio::test]
    async fn test_teardown_ignores_flags_and_chart() {
        let builder = InstallInfoBuilder::new(test_client());
        let ci = resource("broken");
        let info = builder
            .build_for_teardown(CancellationToken::new(), &ci, "", "web")
            .unwrap();
        assert!(info.chart.flags.is_empty());
        assert_eq!(info.chart.release_name, "web");
        assert_eq!(info.namespace, "apps");

        let mut ci = resource("");
        ci.metadata.namespace = None;
        let res = builder.build_for_teardown(CancellationToken::new(), &ci, "", "web");
        assert!(matches!(res, Err(Error::BuildError(_))));
    }

    #[tokio::test]
    async fn test_custom_check() {
        let builder = InstallInfoBuilder::new(test_client()).with_check(Arc::new(
            |_: &DynamicObject, observed: &[DynamicObject]| !observed.is_empty(),
        ));
        let info = builder
            .build(CancellationToken::new(), &resource(""), "charts/web", "web", "")
            .unwrap();
        assert!(!info.is_ready(&[]));
        assert!(info.is_ready(&[info.resource.base_resource.clone()]));
    }
}
