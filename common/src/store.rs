//! Cluster access for the reconciled resource.
use crate::{CustomObject, Error, Result};
use async_trait::async_trait;
use kube::{
    Client, Resource, ResourceExt,
    api::{Patch, PatchParams},
};
use serde_json::json;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn from_resource<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.meta().namespace.clone().unwrap_or_default(),
            name: obj.meta().name.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Read and optimistic-concurrency writes of one kind of resource.
///
/// Writes carry the resource version of the given object; a stale one is
/// rejected with [`Error::Conflict`].
#[async_trait]
pub trait ResourceStore<K: CustomObject>: Send + Sync {
    async fn get(&self, key: &ResourceKey) -> Result<K>;
    /// Persist metadata changes (labels, finalizers)
    async fn update(&self, obj: &K) -> Result<K>;
    async fn update_status(&self, obj: &K) -> Result<K>;
}

pub struct KubeStore<K: CustomObject> {
    client: Client,
    dyntype: K::DynamicType,
}

impl<K: CustomObject<DynamicType = ()>> KubeStore<K> {
    pub fn typed(client: Client) -> Self {
        Self { client, dyntype: () }
    }
}

impl KubeStore<kube::api::DynamicObject> {
    pub fn generic(client: Client, resource: kube::discovery::ApiResource) -> Self {
        Self {
            client,
            dyntype: resource,
        }
    }
}

pub(crate) fn map_kube_error(key: &ResourceKey, e: kube::Error) -> Error {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(key.to_string()),
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(key.to_string()),
        e => Error::KubeError(e),
    }
}

#[async_trait]
impl<K> ResourceStore<K> for KubeStore<K>
where
    K: CustomObject,
{
    async fn get(&self, key: &ResourceKey) -> Result<K> {
        let api = K::namespaced_api(self.client.clone(), &key.namespace, &self.dyntype);
        api.get(&key.name).await.map_err(|e| map_kube_error(key, e))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = ResourceKey::from_resource(obj);
        let api = K::namespaced_api(self.client.clone(), &key.namespace, &self.dyntype);
        let patch = json!({
            "metadata": {
                "resourceVersion": obj.resource_version(),
                "labels": obj.labels(),
                "finalizers": obj.finalizers(),
            }
        });
        tracing::debug!("Updating metadata of {key}");
        api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(&key, e))
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = ResourceKey::from_resource(obj);
        let api = K::namespaced_api(self.client.clone(), &key.namespace, &self.dyntype);
        let status = obj.get_status()?;
        let patch = json!({
            "metadata": {
                "resourceVersion": obj.resource_version(),
            },
            "status": status,
        });
        tracing::debug!("Updating status of {key}");
        api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(&key, e))
    }
}
