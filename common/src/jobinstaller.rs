//! [`Installer`] running helm inside Kubernetes jobs.
//!
//! Every action gets its own job in the namespace of the resource. The
//! installer never waits on a job: each call looks at the job once, moves it
//! one step forward and reports whether the action is complete.
use crate::{Error, InstallInfo, Installer, ResourceKey, Result};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::{
    ResourceExt,
    api::{Api, DeleteParams, DynamicObject, PostParams},
};
use serde_json::{Value, json};

pub const DEFAULT_IMAGE: &str = "alpine/helm:3.16.2";
pub const DEFAULT_SERVICE_ACCOUNT: &str = "chart-installer";
pub const HASH_ANNOTATION: &str = "charts.declarative.dev/spec-hash";
const MAX_NAME_LEN: usize = 63;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobAction {
    Install,
    Uninstall,
}

impl JobAction {
    fn as_str(&self) -> &'static str {
        match self {
            JobAction::Install => "install",
            JobAction::Uninstall => "uninstall",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Running,
    Succeeded,
    Failed,
}

pub fn job_name(action: JobAction, key: &ResourceKey) -> String {
    let name = format!("{}-{}-{}", action.as_str(), key.namespace, key.name);
    let mut short: String = name.chars().take(MAX_NAME_LEN).collect();
    while short.ends_with('-') || short.ends_with('.') {
        short.pop();
    }
    short
}

pub fn job_outcome(job: &Job) -> JobOutcome {
    let status = job.status.clone().unwrap_or_default();
    if status.succeeded.unwrap_or(0) > 0 {
        JobOutcome::Succeeded
    } else if status.failed.unwrap_or(0) > 0 {
        JobOutcome::Failed
    } else {
        JobOutcome::Running
    }
}

fn helm_args(action: JobAction, info: &InstallInfo) -> Vec<String> {
    let release = info.chart.release_name.clone();
    let ns = info.namespace.clone();
    match action {
        JobAction::Install => {
            let mut args = vec![
                "upgrade".to_string(),
                "--install".to_string(),
                release,
                info.chart.chart_path.clone(),
                "--namespace".to_string(),
                ns,
            ];
            for (key, value) in &info.chart.flags {
                args.push("--set-json".to_string());
                args.push(format!("{key}={value}"));
            }
            args
        }
        JobAction::Uninstall => vec![
            "uninstall".to_string(),
            release,
            "--namespace".to_string(),
            ns,
            "--ignore-not-found".to_string(),
        ],
    }
}

fn owner_reference(info: &InstallInfo) -> Option<Value> {
    let base = &info.resource.base_resource;
    let types = base.types.as_ref()?;
    Some(json!({
        "apiVersion": types.api_version,
        "kind": types.kind,
        "name": base.name_any(),
        "uid": base.uid()?,
        "blockOwnerDeletion": true,
        "controller": true,
    }))
}

pub struct JobInstaller {
    image: String,
    service_account: String,
}

impl Default for JobInstaller {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE, DEFAULT_SERVICE_ACCOUNT)
    }
}

impl JobInstaller {
    pub fn new(image: &str, service_account: &str) -> Self {
        Self {
            image: image.to_string(),
            service_account: service_account.to_string(),
        }
    }

    pub fn job_definition(&self, action: JobAction, info: &InstallInfo) -> Result<Job> {
        let name = job_name(action, &info.resource.key);
        let container = json!({
            "name": "helm",
            "image": self.image,
            "imagePullPolicy": "IfNotPresent",
            "args": helm_args(action, info),
        });
        let hash = sha256::digest(serde_json::to_string(&container)?);
        let mut metadata = json!({
            "name": name,
            "namespace": info.namespace,
            "labels": {
                "app.kubernetes.io/managed-by": crate::ChartInstall::COMPONENT,
                "app.kubernetes.io/instance": info.resource.key.name,
                "charts.declarative.dev/action": action.as_str(),
            },
            "annotations": {
                HASH_ANNOTATION: hash,
            },
        });
        if let Some(owner) = owner_reference(info) {
            metadata["ownerReferences"] = json!([owner]);
        }
        Ok(serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": metadata,
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "spec": {
                        "serviceAccountName": self.service_account,
                        "restartPolicy": "Never",
                        "containers": [container],
                    }
                }
            }
        }))?)
    }

    async fn delete_job(api: &Api<Job>, name: &str) -> Result<()> {
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn create_job(api: &Api<Job>, info: &InstallInfo, job: &Job) -> Result<()> {
        if info.ctx.is_cancelled() {
            return Ok(());
        }
        match api.create(&PostParams::default(), job).await {
            Ok(_) => Ok(()),
            // a concurrent pass created it first
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

fn hash_of(job: &Job) -> Option<String> {
    job.annotations().get(HASH_ANNOTATION).cloned()
}

#[derive(Debug, PartialEq)]
enum InstallStep<'a> {
    Create,
    Replace,
    Wait,
    Finish(&'a Job),
    Fail,
}

/// What to do with the install job, given the one found on the cluster
fn plan_install<'a>(current: Option<&'a Job>, desired: &Job) -> InstallStep<'a> {
    match current {
        None => InstallStep::Create,
        Some(job) if hash_of(job) != hash_of(desired) => InstallStep::Replace,
        Some(job) => match job_outcome(job) {
            JobOutcome::Running => InstallStep::Wait,
            JobOutcome::Succeeded => InstallStep::Finish(job),
            JobOutcome::Failed => InstallStep::Fail,
        },
    }
}

#[async_trait]
impl Installer for JobInstaller {
    async fn install(&self, info: &InstallInfo) -> Result<bool> {
        let api: Api<Job> = Api::namespaced(info.remote.client.clone(), &info.namespace);
        let desired = self.job_definition(JobAction::Install, info)?;
        let name = desired.name_any();
        let current = api.get_opt(&name).await.map_err(Error::KubeError)?;
        match plan_install(current.as_ref(), &desired) {
            InstallStep::Create => {
                tracing::info!("Creating install job {name} for {}", info.resource.key);
                Self::create_job(&api, info, &desired).await?;
                Ok(false)
            }
            InstallStep::Replace => {
                tracing::info!("Install job {name} is outdated, replacing it");
                Self::delete_job(&api, &name).await?;
                Ok(false)
            }
            InstallStep::Wait => Ok(false),
            InstallStep::Finish(job) => {
                let observed: DynamicObject = serde_json::from_value(serde_json::to_value(job)?)?;
                if !info.is_ready(&[observed]) {
                    return Ok(false);
                }
                // a later reinstall must run helm again
                Self::delete_job(&api, &name).await?;
                Ok(true)
            }
            InstallStep::Fail => {
                Self::delete_job(&api, &name).await?;
                Err(Error::Installer(format!("install job {name} failed")))
            }
        }
    }

    async fn uninstall(&self, info: &InstallInfo) -> Result<bool> {
        let api: Api<Job> = Api::namespaced(info.remote.client.clone(), &info.namespace);
        Self::delete_job(&api, &job_name(JobAction::Install, &info.resource.key)).await?;
        let desired = self.job_definition(JobAction::Uninstall, info)?;
        let name = desired.name_any();
        let Some(job) = api.get_opt(&name).await.map_err(Error::KubeError)? else {
            tracing::info!("Creating uninstall job {name} for {}", info.resource.key);
            Self::create_job(&api, info, &desired).await?;
            return Ok(false);
        };
        match job_outcome(&job) {
            JobOutcome::Running => Ok(false),
            JobOutcome::Succeeded => {
                Self::delete_job(&api, &name).await?;
                Ok(true)
            }
            JobOutcome::Failed => {
                Self::delete_job(&api, &name).await?;
                Err(Error::Installer(format!("uninstall job {name} failed")))
            }
        }
    }
}
