//! Uniform access to spec and status, whether the resource comes as a
//! `ChartInstall` or as a schema-less `DynamicObject`.
use crate::{ChartInstall, ChartInstallSpec, ChartInstallStatus, Error, Result};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    Client, Resource, ResourceExt,
    api::{Api, DynamicObject},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Read and write access to a chart install resource.
///
/// The reconciliation engine only talks to resources through this trait, so it
/// never has to know which representation it was handed.
pub trait CustomObject:
    Resource + Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn get_spec(&self) -> Result<ChartInstallSpec>;
    fn get_status(&self) -> Result<ChartInstallStatus>;
    fn set_status(&mut self, status: ChartInstallStatus) -> Result<()>;
    fn component_name(&self) -> Result<String>;
    /// Attribute-tree form handed to installers as the base resource
    fn to_generic(&self) -> Result<DynamicObject>;
    fn object_reference(&self) -> ObjectReference;
    fn namespaced_api(client: Client, namespace: &str, dyntype: &Self::DynamicType) -> Api<Self>;

    fn deletion_requested(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}

fn obj_key<K: Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default()
    )
}

impl CustomObject for ChartInstall {
    fn get_spec(&self) -> Result<ChartInstallSpec> {
        Ok(self.spec.clone())
    }

    fn get_status(&self) -> Result<ChartInstallStatus> {
        Ok(self.status.clone().unwrap_or_default())
    }

    fn set_status(&mut self, status: ChartInstallStatus) -> Result<()> {
        self.status = Some(status);
        Ok(())
    }

    fn component_name(&self) -> Result<String> {
        Ok(ChartInstall::COMPONENT.to_string())
    }

    fn to_generic(&self) -> Result<DynamicObject> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }

    fn object_reference(&self) -> ObjectReference {
        self.object_ref(&())
    }

    fn namespaced_api(client: Client, namespace: &str, _dyntype: &()) -> Api<Self> {
        Api::namespaced(client, namespace)
    }
}

impl CustomObject for DynamicObject {
    fn get_spec(&self) -> Result<ChartInstallSpec> {
        let spec = nested_map(self, "spec")?.unwrap_or_default();
        serde_json::from_value(Value::Object(spec))
            .map_err(|e| Error::TypeMismatch(format!("{}: unable to get spec: {e}", obj_key(self))))
    }

    fn get_status(&self) -> Result<ChartInstallStatus> {
        match nested_map(self, "status")? {
            Some(status) => serde_json::from_value(Value::Object(status)).map_err(|e| {
                Error::TypeMismatch(format!("{}: unable to get status: {e}", obj_key(self)))
            }),
            None => Ok(ChartInstallStatus::default()),
        }
    }

    fn set_status(&mut self, status: ChartInstallStatus) -> Result<()> {
        let value = serde_json::to_value(status)?;
        let key = obj_key(self);
        match self.data.as_object_mut() {
            Some(data) => {
                data.insert("status".to_string(), value);
                Ok(())
            }
            None => Err(Error::TypeMismatch(format!("{key}: unable to set status"))),
        }
    }

    fn component_name(&self) -> Result<String> {
        match &self.types {
            Some(t) if !t.kind.is_empty() => Ok(t.kind.to_lowercase()),
            _ => Err(Error::TypeMismatch(obj_key(self))),
        }
    }

    fn to_generic(&self) -> Result<DynamicObject> {
        Ok(self.clone())
    }

    fn object_reference(&self) -> ObjectReference {
        let types = self.types.clone().unwrap_or_default();
        ObjectReference {
            api_version: Some(types.api_version),
            kind: Some(types.kind),
            name: Some(self.name_any()),
            namespace: self.namespace(),
            uid: self.uid(),
            resource_version: self.resource_version(),
            ..ObjectReference::default()
        }
    }

    fn namespaced_api(client: Client, namespace: &str, dyntype: &kube::discovery::ApiResource) -> Api<Self> {
        Api::namespaced_with(client, namespace, dyntype)
    }
}

/// Path-addressed read of a top level map. A missing or null key is `None`,
/// anything else that is not a map is a type mismatch.
fn nested_map(obj: &DynamicObject, key: &str) -> Result<Option<serde_json::Map<String, Value>>> {
    let data = obj
        .data
        .as_object()
        .ok_or_else(|| Error::TypeMismatch(obj_key(obj)))?;
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(m)) => Ok(Some(m.clone())),
        Some(_) => Err(Error::TypeMismatch(format!("{}: {key} is not a map", obj_key(obj)))),
    }
}
