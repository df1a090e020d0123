use crate::{
    Error, Metrics, Result,
    config::Config,
    reconciler::ManifestReconciler,
};
use chrono::{DateTime, Utc};
use common::{
    ChartInstall, CustomObject, InstallInfoBuilder, Installer, ResourceKey,
    context::get_reporter,
    jobinstaller::JobInstaller,
    store::KubeStore,
};
use futures::{FutureExt, StreamExt, future::BoxFuture};
use kube::{
    ResourceExt,
    api::{Api, DynamicObject, ListParams},
    client::Client,
    discovery::ApiResource,
    runtime::{
        controller::{Action, Controller},
        events::Reporter,
        watcher,
    },
};
use serde::Serialize;
use std::{fmt::Debug, hash::Hash, sync::Arc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

// Context for our reconciler
pub struct Context<K: CustomObject> {
    pub engine: ManifestReconciler<K>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Arc<Metrics>,
    /// Cancelled on shutdown
    pub shutdown: CancellationToken,
}

#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = %obj.namespace().unwrap_or_default()))]
pub async fn reconcile<K: CustomObject>(obj: Arc<K>, ctx: Arc<Context<K>>) -> Result<Action> {
    let _measure = ctx.metrics.reconcile.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();
    let key = ResourceKey::from_resource(obj.as_ref());
    ctx.engine.reconcile(&ctx.shutdown, &key).await
}

pub fn error_policy<K: CustomObject>(obj: Arc<K>, error: &Error, ctx: Arc<Context<K>>) -> Action {
    warn!(
        "reconcile failed for '{:?}.{:?}': {:?}",
        obj.meta().namespace,
        obj.meta().name,
        error
    );
    ctx.metrics.reconcile.reconcile_failure(obj.as_ref(), error);
    Action::requeue(ctx.engine.options().error_backoff)
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub generic: bool,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            generic: false,
            reporter: get_reporter(),
        }
    }
}

/// Data owned by the Manager
#[derive(Clone, Default)]
pub struct Manager {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics
    metrics: Arc<Metrics>,
}

/// Ensure the CRD is installed before loop-watching
async fn check_crd<K: CustomObject>(api: &Api<K>) -> Result<()> {
    api.list(&ListParams::default().limit(1)).await.map_err(|e| {
        Error::Other(format!(
            "is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f - ({e})"
        ))
    })?;
    Ok(())
}

fn run_controller<K>(
    controller: Controller<K>,
    ctx: Arc<Context<K>>,
    shutdown: CancellationToken,
) -> BoxFuture<'static, ()>
where
    K: CustomObject,
    K::DynamicType: Eq + Hash + Clone + Debug + Unpin,
{
    controller
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .boxed()
}

/// Manager that owns a Controller for ChartInstall
impl Manager {
    /// Lifecycle initialization interface for app
    ///
    /// This returns a `Manager` that drives a `Controller` + a future to be awaited
    /// It is up to `main` to wait for the controller stream.
    pub async fn new(config: &Config, shutdown: CancellationToken) -> Result<(Self, BoxFuture<'static, ()>)> {
        let client = Client::try_default().await.map_err(Error::KubeError)?;
        let manager = Manager::default();
        manager.diagnostics.write().await.generic = config.generic;
        let installer: Arc<dyn Installer> = Arc::new(JobInstaller::new(
            &config.installer_image,
            &config.installer_service_account,
        ));
        let builder = InstallInfoBuilder::new(client.clone());
        let options = config.reconciler_options();
        let watch = watcher::Config::default().any_semantic();

        let controller = if config.generic {
            let resource = ApiResource::erase::<ChartInstall>(&());
            let api: Api<DynamicObject> = match &config.namespace {
                Some(ns) => Api::namespaced_with(client.clone(), ns, &resource),
                None => Api::all_with(client.clone(), &resource),
            };
            check_crd(&api).await?;
            let store = Arc::new(KubeStore::generic(client.clone(), resource.clone()));
            let ctx = manager.context(
                ManifestReconciler::<DynamicObject>::new(store, installer, builder, options)
                    .with_events(client.clone(), get_reporter()),
                shutdown.clone(),
            );
            run_controller(Controller::new_with(api, watch, resource), ctx, shutdown)
        } else {
            let api: Api<ChartInstall> = match &config.namespace {
                Some(ns) => Api::namespaced(client.clone(), ns),
                None => Api::all(client.clone()),
            };
            check_crd(&api).await?;
            let store = Arc::new(KubeStore::<ChartInstall>::typed(client.clone()));
            let ctx = manager.context(
                ManifestReconciler::<ChartInstall>::new(store, installer, builder, options)
                    .with_events(client.clone(), get_reporter()),
                shutdown.clone(),
            );
            run_controller(Controller::new(api, watch), ctx, shutdown)
        };
        Ok((manager, controller))
    }

    fn context<K: CustomObject>(&self, engine: ManifestReconciler<K>, shutdown: CancellationToken) -> Arc<Context<K>> {
        Arc::new(Context {
            engine,
            diagnostics: self.diagnostics.clone(),
            metrics: self.metrics.clone(),
            shutdown,
        })
    }

    /// Metrics getter
    pub fn metrics(&self) -> String {
        self.metrics.encode()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}
