//! The reconciliation state machine.
//!
//! Every pass reads the resource, picks exactly one [`Step`] from its
//! persisted state and commits at most one write. Nothing is kept in memory
//! between passes, so any pass can be replayed from the stored resource.
use crate::{Error, Result, events};
use common::{
    ChartInstallStatus, CustomObject, InstallInfoBuilder, Installer, ResourceKey, ResourceStore, State,
    chartinstall::{InstallCondition, InstallItem},
    finalizer::{add_deletion_finalizer, has_deletion_finalizer, remove_deletion_finalizer},
};
use kube::{
    Client, ResourceExt,
    runtime::{
        controller::Action,
        events::{Event, Recorder, Reporter},
    },
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerOptions {
    pub resource_labels: BTreeMap<String, String>,
    pub progress_requeue: Duration,
    pub resync: Duration,
    pub error_backoff: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            resource_labels: BTreeMap::new(),
            progress_requeue: Duration::from_secs(30),
            resync: Duration::from_secs(15 * 60),
            error_backoff: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    MarkDeleting,
    AddFinalizer,
    Initialize,
    Install,
    Uninstall,
    Retry,
    Verify,
}

/// Deletion intent first, then the finalizer, then the persisted state.
pub fn next_step(state: State, deletion_requested: bool, finalizer_present: bool) -> Step {
    if deletion_requested && state != State::Deleting {
        return Step::MarkDeleting;
    }
    if !finalizer_present && !deletion_requested {
        return Step::AddFinalizer;
    }
    match state {
        State::Empty => Step::Initialize,
        State::Processing => Step::Install,
        State::Ready => Step::Verify,
        State::Error => Step::Retry,
        State::Deleting => Step::Uninstall,
    }
}

pub struct ManifestReconciler<K: CustomObject> {
    store: Arc<dyn ResourceStore<K>>,
    installer: Arc<dyn Installer>,
    builder: InstallInfoBuilder,
    options: ReconcilerOptions,
    events: Option<(Client, Reporter)>,
}

impl<K: CustomObject> ManifestReconciler<K> {
    pub fn new(
        store: Arc<dyn ResourceStore<K>>,
        installer: Arc<dyn Installer>,
        builder: InstallInfoBuilder,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            store,
            installer,
            builder,
            options,
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, client: Client, reporter: Reporter) -> Self {
        self.events = Some((client, reporter));
        self
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.options
    }

    /// One reconciliation pass for `key`.
    ///
    /// Conflicts and vanished resources end the pass without error; only
    /// unusable resources (type mismatch, invalid install information) and
    /// cluster failures are returned to the caller.
    pub async fn reconcile(&self, ctx: &CancellationToken, key: &ResourceKey) -> Result<Action> {
        if ctx.is_cancelled() {
            return Ok(Action::await_change());
        }
        let obj = match self.store.get(key).await {
            Ok(obj) => obj,
            Err(Error::NotFound(_)) => {
                info!("{key} got deleted");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        };
        match self.dispatch(ctx, key, obj).await {
            Err(Error::Conflict(_)) => {
                debug!("{key} changed during the pass, retrying");
                Ok(Action::requeue(CONFLICT_REQUEUE))
            }
            Err(Error::NotFound(_)) => Ok(Action::await_change()),
            res => res,
        }
    }

    async fn dispatch(&self, ctx: &CancellationToken, key: &ResourceKey, obj: K) -> Result<Action> {
        let status = obj.get_status()?;
        let step = next_step(status.state, obj.deletion_requested(), has_deletion_finalizer(&obj));
        debug!("{key} is {}, running {step:?}", status.state);
        match step {
            Step::MarkDeleting => {
                self.transition(ctx, key, obj, status, State::Deleting, InstallCondition::deleting())
                    .await
            }
            Step::AddFinalizer => {
                let mut obj = obj;
                add_deletion_finalizer(&mut obj);
                self.commit_metadata(ctx, &obj).await?;
                Ok(Action::await_change())
            }
            Step::Initialize => self.initialize(ctx, key, obj, status).await,
            Step::Install => self.install(ctx, key, obj, status).await,
            Step::Uninstall => self.uninstall(ctx, key, obj, status).await,
            Step::Retry => {
                let item = InstallItem::from(&obj.get_spec()?);
                self.transition(ctx, key, obj, status, State::Processing, InstallCondition::retrying(item))
                    .await
            }
            Step::Verify => self.verify(ctx, key, obj, status).await,
        }
    }

    fn pending_labels(&self, obj: &K) -> bool {
        let labels = obj.labels();
        self.options
            .resource_labels
            .iter()
            .any(|(k, v)| labels.get(k) != Some(v))
    }

    async fn initialize(
        &self,
        ctx: &CancellationToken,
        key: &ResourceKey,
        mut obj: K,
        status: ChartInstallStatus,
    ) -> Result<Action> {
        if self.pending_labels(&obj) {
            let wanted = self.options.resource_labels.clone();
            obj.labels_mut().extend(wanted);
            debug!("Setting resource labels on {key}");
            self.commit_metadata(ctx, &obj).await?;
            return Ok(Action::await_change());
        }
        let item = InstallItem::from(&obj.get_spec()?);
        self.transition(ctx, key, obj, status, State::Processing, InstallCondition::processing(item))
            .await
    }

    async fn install(
        &self,
        ctx: &CancellationToken,
        key: &ResourceKey,
        obj: K,
        mut status: ChartInstallStatus,
    ) -> Result<Action> {
        let spec = obj.get_spec()?;
        let item = InstallItem::from(&spec);
        let info = self.builder.build(
            ctx.clone(),
            &obj,
            &spec.chart_path,
            &spec.release_name,
            &spec.chart_flags,
        )?;
        if ctx.is_cancelled() {
            return Ok(Action::await_change());
        }
        match self.installer.install(&info).await {
            Ok(true) => {
                status.installed = Some(item.clone());
                self.transition(ctx, key, obj, status, State::Ready, InstallCondition::ready(item))
                    .await
            }
            Ok(false) => {
                debug!("Install of {key} still in progress");
                Ok(Action::requeue(self.options.progress_requeue))
            }
            Err(e) => {
                warn!("Install of {key} failed: {e}");
                let cond = InstallCondition::install_failed(&e.to_string(), item);
                self.transition(ctx, key, obj, status, State::Error, cond).await
            }
        }
    }

    async fn uninstall(
        &self,
        ctx: &CancellationToken,
        key: &ResourceKey,
        mut obj: K,
        status: ChartInstallStatus,
    ) -> Result<Action> {
        let spec = obj.get_spec()?;
        let item = InstallItem::from(&spec);
        let info = self
            .builder
            .build_for_teardown(ctx.clone(), &obj, &spec.chart_path, &spec.release_name)?;
        if ctx.is_cancelled() {
            return Ok(Action::await_change());
        }
        match self.installer.uninstall(&info).await {
            Ok(true) => {
                if remove_deletion_finalizer(&mut obj) && self.commit_metadata(ctx, &obj).await?.is_some() {
                    info!("{key} uninstalled, finalizer removed");
                    self.publish(&obj, events::from_release(&spec.release_name)).await;
                }
                Ok(Action::await_change())
            }
            Ok(false) => {
                debug!("Uninstall of {key} still in progress");
                Ok(Action::requeue(self.options.progress_requeue))
            }
            Err(e) => {
                warn!("Uninstall of {key} failed: {e}");
                let cond = InstallCondition::uninstall_failed(&e.to_string(), item);
                if status.have_condition(&cond) {
                    return Ok(Action::requeue(self.options.error_backoff));
                }
                self.transition(ctx, key, obj, status, State::Deleting, cond).await
            }
        }
    }

    async fn verify(
        &self,
        ctx: &CancellationToken,
        key: &ResourceKey,
        obj: K,
        status: ChartInstallStatus,
    ) -> Result<Action> {
        let spec = obj.get_spec()?;
        let item = InstallItem::from(&spec);
        if status.installed.as_ref().is_some_and(|installed| *installed != item) {
            info!("{key} specification changed, reinstalling");
            return self
                .transition(ctx, key, obj, status, State::Processing, InstallCondition::spec_changed(item))
                .await;
        }
        let info = self.builder.build(
            ctx.clone(),
            &obj,
            &spec.chart_path,
            &spec.release_name,
            &spec.chart_flags,
        )?;
        match self.installer.verify(&info).await {
            Ok(true) => Ok(Action::requeue(self.options.resync)),
            Ok(false) => {
                info!("{key} drifted, reinstalling");
                self.transition(ctx, key, obj, status, State::Processing, InstallCondition::drifted(item))
                    .await
            }
            Err(e) => {
                warn!("Verification of {key} failed: {e}");
                let cond = InstallCondition::verify_failed(&e.to_string(), item);
                self.transition(ctx, key, obj, status, State::Error, cond).await
            }
        }
    }

    /// Record `cond`, move to `next` and commit the status
    async fn transition(
        &self,
        ctx: &CancellationToken,
        key: &ResourceKey,
        mut obj: K,
        mut status: ChartInstallStatus,
        next: State,
        cond: InstallCondition,
    ) -> Result<Action> {
        let from = status.state;
        let event = events::from_transition(from, next, &cond);
        status.state = next;
        status.record(cond);
        if ctx.is_cancelled() {
            info!("Pass on {key} cancelled, {from} -> {next} not committed");
            return Ok(Action::await_change());
        }
        obj.set_status(status)?;
        let updated = self.store.update_status(&obj).await?;
        info!("{key}: {from} -> {next}");
        self.publish(&updated, event).await;
        Ok(Action::await_change())
    }

    /// `None` when the pass was cancelled before the write
    async fn commit_metadata(&self, ctx: &CancellationToken, obj: &K) -> Result<Option<K>> {
        if ctx.is_cancelled() {
            return Ok(None);
        }
        self.store.update(obj).await.map(Some)
    }

    async fn publish(&self, obj: &K, event: Event) {
        if let Some((client, base)) = &self.events {
            let reporter = match events::reporter_for(obj, base.instance.clone()) {
                Ok(reporter) => reporter,
                Err(e) => {
                    warn!("No event reporter for {}: {e}", obj.name_any());
                    return;
                }
            };
            let recorder = Recorder::new(client.clone(), reporter, obj.object_reference());
            if let Err(e) = recorder.publish(event).await {
                warn!("Unable to publish event for {}: {e}", obj.name_any());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        ChartInstall, ChartInstallSpec, InstallInfoBuilder,
        k8smock::{MemoryStore, MockInstaller, chart_install, generic, nginx_spec, test_client},
    };
    use kube::api::DynamicObject;
    use serde_json::json;

    struct Harness<K: CustomObject> {
        store: Arc<MemoryStore<K>>,
        installer: Arc<MockInstaller>,
        engine: ManifestReconciler<K>,
        key: ResourceKey,
    }

    impl<K: CustomObject> Harness<K> {
        fn new(obj: K, installer: MockInstaller) -> Self {
            Self::with_options(obj, installer, ReconcilerOptions::default())
        }

        fn with_options(obj: K, installer: MockInstaller, options: ReconcilerOptions) -> Self {
            let store = Arc::new(MemoryStore::new());
            let obj = store.insert(obj);
            let installer = Arc::new(installer);
            let engine: ManifestReconciler<K> = ManifestReconciler::new(
                store.clone(),
                installer.clone(),
                InstallInfoBuilder::new(test_client()),
                options,
            );
            Self {
                key: ResourceKey::from_resource(&obj),
                store,
                installer,
                engine,
            }
        }

        async fn pass(&self) -> Result<Action> {
            self.engine.reconcile(&CancellationToken::new(), &self.key).await
        }

        fn current(&self) -> K {
            self.store.current(&self.key).unwrap()
        }

        fn status(&self) -> ChartInstallStatus {
            self.current().get_status().unwrap()
        }

        fn state(&self) -> State {
            self.status().state
        }
    }

    fn resource_in(state: State, finalizer: bool) -> ChartInstall {
        let mut ci = chart_install("apps", "nginx", nginx_spec());
        if finalizer {
            add_deletion_finalizer(&mut ci);
        }
        let mut status = ChartInstallStatus {
            state,
            ..Default::default()
        };
        if state == State::Ready {
            status.installed = Some(InstallItem::from(&ci.spec));
        }
        ci.status = Some(status);
        ci
    }

    #[test]
    fn test_next_step_ordering() {
        for state in [State::Empty, State::Processing, State::Ready, State::Error] {
            assert_eq!(next_step(state, true, true), Step::MarkDeleting);
            assert_eq!(next_step(state, true, false), Step::MarkDeleting);
            assert_eq!(next_step(state, false, false), Step::AddFinalizer);
        }
        assert_eq!(next_step(State::Deleting, true, true), Step::Uninstall);
        assert_eq!(next_step(State::Empty, false, true), Step::Initialize);
        assert_eq!(next_step(State::Processing, false, true), Step::Install);
        assert_eq!(next_step(State::Ready, false, true), Step::Verify);
        assert_eq!(next_step(State::Error, false, true), Step::Retry);
    }

    /// Creation scenario; returns the committed states
    async fn creation_scenario<K: CustomObject>(obj: K) -> Vec<State> {
        let h = Harness::new(obj, MockInstaller::new().with_installs(vec![Ok(false), Ok(true)]));

        assert_eq!(h.pass().await.unwrap(), Action::await_change());
        assert!(has_deletion_finalizer(&h.current()));
        assert_eq!(h.state(), State::Empty);
        assert_eq!(h.installer.install_calls(), 0);

        assert_eq!(h.pass().await.unwrap(), Action::await_change());
        assert_eq!(h.state(), State::Processing);
        assert_eq!(h.installer.install_calls(), 0);

        assert_eq!(h.pass().await.unwrap(), Action::requeue(Duration::from_secs(30)));
        assert_eq!(h.state(), State::Processing);
        assert_eq!(h.installer.install_calls(), 1);

        assert_eq!(h.pass().await.unwrap(), Action::await_change());
        assert_eq!(h.state(), State::Ready);
        assert_eq!(h.installer.install_calls(), 2);
        let status = h.status();
        assert_eq!(status.installed.as_ref().unwrap().release_name, "nginx");
        assert_eq!(status.last_condition().unwrap().reason, "Installed");
        let chart = h.installer.last_chart().unwrap();
        assert_eq!(chart.flags["replicaCount"], 2);
        h.store.history()
    }

    #[tokio::test]
    async fn test_creation_typed_and_generic_are_equivalent() {
        let typed = creation_scenario(chart_install("apps", "nginx", nginx_spec())).await;
        let dynamic = creation_scenario(generic(&chart_install("apps", "nginx", nginx_spec()))).await;
        assert_eq!(typed, vec![State::Processing, State::Ready]);
        assert_eq!(typed, dynamic);
    }

    #[tokio::test]
    async fn test_ready_is_idempotent() {
        let h = Harness::new(resource_in(State::Ready, true), MockInstaller::new());
        for _ in 0..2 {
            assert_eq!(h.pass().await.unwrap(), Action::requeue(Duration::from_secs(15 * 60)));
        }
        assert_eq!(h.store.status_update_count(), 0);
        assert_eq!(h.store.update_count(), 0);
        assert_eq!(h.installer.verify_calls(), 2);
        assert_eq!(h.installer.install_calls(), 0);
    }

    #[tokio::test]
    async fn test_finalizer_comes_first() {
        for state in [State::Empty, State::Processing, State::Ready, State::Error] {
            let h = Harness::new(resource_in(state, false), MockInstaller::new());
            h.pass().await.unwrap();
            assert!(has_deletion_finalizer(&h.current()));
            assert_eq!(h.state(), state);
            assert_eq!(h.installer.install_calls(), 0);
            assert_eq!(h.store.status_update_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_deletion_preempts_processing() {
        let h = Harness::new(resource_in(State::Processing, true), MockInstaller::new());
        h.store.mark_for_deletion(&h.key);
        h.pass().await.unwrap();
        assert_eq!(h.state(), State::Deleting);
        assert_eq!(h.installer.install_calls(), 0);
        assert_eq!(h.store.history(), vec![State::Deleting]);
    }

    /// Deletion scenario from `Ready`; returns the committed states
    async fn deletion_scenario<K: CustomObject>(obj: K) -> Vec<State> {
        let h = Harness::new(obj, MockInstaller::new().with_uninstalls(vec![Ok(false), Ok(true)]));
        h.store.mark_for_deletion(&h.key);

        h.pass().await.unwrap();
        assert_eq!(h.state(), State::Deleting);
        assert_eq!(h.installer.uninstall_calls(), 0);

        assert_eq!(h.pass().await.unwrap(), Action::requeue(Duration::from_secs(30)));
        assert_eq!(h.state(), State::Deleting);
        assert!(has_deletion_finalizer(&h.current()));

        assert_eq!(h.pass().await.unwrap(), Action::await_change());
        assert_eq!(h.installer.uninstall_calls(), 2);
        assert!(h.store.current(&h.key).is_none());

        // redelivery of a vanished key
        assert_eq!(h.pass().await.unwrap(), Action::await_change());
        assert_eq!(h.installer.uninstall_calls(), 2);
        h.store.history()
    }

    #[tokio::test]
    async fn test_deletion_typed_and_generic_are_equivalent() {
        let typed = deletion_scenario(resource_in(State::Ready, true)).await;
        let dynamic = deletion_scenario(generic(&resource_in(State::Ready, true))).await;
        assert_eq!(typed, vec![State::Deleting]);
        assert_eq!(typed, dynamic);
    }

    #[tokio::test]
    async fn test_bad_flags_do_not_block_deletion() {
        let mut ci = resource_in(State::Processing, true);
        ci.spec = ChartInstallSpec {
            chart_flags: "replicas".to_string(),
            ..nginx_spec()
        };
        let h = Harness::new(ci, MockInstaller::new());
        h.store.mark_for_deletion(&h.key);

        h.pass().await.unwrap();
        assert_eq!(h.state(), State::Deleting);
        assert_eq!(h.pass().await.unwrap(), Action::await_change());
        assert_eq!(h.installer.uninstall_calls(), 1);
        assert!(h.installer.last_chart().unwrap().flags.is_empty());
        assert!(h.store.current(&h.key).is_none());
    }

    #[tokio::test]
    async fn test_finalizer_kept_while_uninstall_fails() {
        let h = Harness::new(
            resource_in(State::Deleting, true),
            MockInstaller::new().with_uninstalls(vec![
                Err(Error::Installer("job failed".to_string())),
                Err(Error::Installer("job failed".to_string())),
            ]),
        );
        h.store.mark_for_deletion(&h.key);

        assert_eq!(h.pass().await.unwrap(), Action::await_change());
        assert_eq!(h.state(), State::Deleting);
        assert!(has_deletion_finalizer(&h.current()));
        let cond = h.status().last_condition().cloned().unwrap();
        assert_eq!(cond.reason, "UninstallFailed");
        assert!(cond.message.contains("job failed"));

        // same failure again: nothing new to record
        assert_eq!(h.pass().await.unwrap(), Action::requeue(Duration::from_secs(5 * 60)));
        assert_eq!(h.store.status_update_count(), 1);
        assert!(has_deletion_finalizer(&h.current()));
    }

    /// Install failure then retry; returns the committed states
    async fn install_error_scenario<K: CustomObject>(obj: K) -> Vec<State> {
        let h = Harness::new(
            obj,
            MockInstaller::new().with_installs(vec![Err(Error::Installer("chart not found".to_string()))]),
        );
        assert_eq!(h.pass().await.unwrap(), Action::await_change());
        assert_eq!(h.state(), State::Error);
        let cond = h.status().last_condition().cloned().unwrap();
        assert_eq!(cond.reason, "InstallFailed");
        assert!(cond.message.contains("chart not found"));

        // retried on the very next pass
        h.pass().await.unwrap();
        assert_eq!(h.state(), State::Processing);
        assert_eq!(h.status().last_condition().unwrap().reason, "Retrying");
        h.store.history()
    }

    #[tokio::test]
    async fn test_install_error_typed_and_generic_are_equivalent() {
        let typed = install_error_scenario(resource_in(State::Processing, true)).await;
        let dynamic = install_error_scenario(generic(&resource_in(State::Processing, true))).await;
        assert_eq!(typed, vec![State::Error, State::Processing]);
        assert_eq!(typed, dynamic);
    }

    #[tokio::test]
    async fn test_conflict_retries_the_pass() {
        let h = Harness::new(resource_in(State::Error, true), MockInstaller::new());
        h.store.inject_conflicts(1);
        assert_eq!(h.pass().await.unwrap(), Action::requeue(Duration::from_secs(1)));
        assert_eq!(h.state(), State::Error);
        h.pass().await.unwrap();
        assert_eq!(h.state(), State::Processing);
    }

    #[tokio::test]
    async fn test_concurrent_write_rejects_stale_commit() {
        let h = Harness::new(resource_in(State::Processing, true), MockInstaller::new());
        let obj = h.current();
        h.store.touch(&h.key);
        let res = h.engine.dispatch(&CancellationToken::new(), &h.key, obj).await;
        assert!(matches!(res, Err(Error::Conflict(_))));
        assert_eq!(h.state(), State::Processing);
        assert_eq!(h.store.status_update_count(), 0);

        // the next delivery reads the fresh version
        assert_eq!(h.pass().await.unwrap(), Action::await_change());
        assert_eq!(h.state(), State::Ready);
    }

    #[tokio::test]
    async fn test_cancelled_pass_writes_nothing() {
        let h = Harness::new(resource_in(State::Empty, true), MockInstaller::new());
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            h.engine.reconcile(&token, &h.key).await.unwrap(),
            Action::await_change()
        );
        assert_eq!(h.store.status_update_count(), 0);
        assert_eq!(h.state(), State::Empty);
    }

    #[tokio::test]
    async fn test_cancelled_during_install_skips_commit() {
        let h = Harness::new(resource_in(State::Processing, true), MockInstaller::new());
        let token = CancellationToken::new();
        let obj = h.current();
        let status = obj.get_status().unwrap();
        token.cancel();
        let action = h.engine.install(&token, &h.key, obj, status).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(h.installer.install_calls(), 0);
        assert_eq!(h.store.status_update_count(), 0);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_returned() {
        let mut obj = generic(&resource_in(State::Processing, true));
        obj.data["status"] = json!(["not", "a", "map"]);
        let h: Harness<DynamicObject> = Harness::new(obj, MockInstaller::new());
        assert!(matches!(h.pass().await, Err(Error::TypeMismatch(_))));
        assert_eq!(h.store.status_update_count(), 0);
    }

    #[tokio::test]
    async fn test_build_error_does_not_advance() {
        let mut ci = resource_in(State::Processing, true);
        ci.spec = ChartInstallSpec {
            chart_flags: "replicas".to_string(),
            ..nginx_spec()
        };
        let h = Harness::new(ci, MockInstaller::new());
        assert!(matches!(h.pass().await, Err(Error::BuildError(_))));
        assert_eq!(h.state(), State::Processing);
        assert_eq!(h.installer.install_calls(), 0);
    }

    #[tokio::test]
    async fn test_resource_labels_before_processing() {
        let options = ReconcilerOptions {
            resource_labels: BTreeMap::from([("team".to_string(), "web".to_string())]),
            ..Default::default()
        };
        let h = Harness::with_options(resource_in(State::Empty, true), MockInstaller::new(), options);
        h.pass().await.unwrap();
        assert_eq!(h.current().labels().get("team").map(String::as_str), Some("web"));
        assert_eq!(h.state(), State::Empty);
        h.pass().await.unwrap();
        assert_eq!(h.state(), State::Processing);
        assert_eq!(h.store.update_count(), 1);
    }

    #[tokio::test]
    async fn test_drift_and_spec_change_reinstall() {
        let h = Harness::new(
            resource_in(State::Ready, true),
            MockInstaller::new().with_verifies(vec![Ok(false)]),
        );
        h.pass().await.unwrap();
        assert_eq!(h.state(), State::Processing);
        assert_eq!(h.status().last_condition().unwrap().reason, "Drifted");

        let mut ci = resource_in(State::Ready, true);
        ci.status.as_mut().unwrap().installed = Some(InstallItem {
            chart_flags: "replicaCount=1".to_string(),
            ..InstallItem::from(&ci.spec)
        });
        let h = Harness::new(ci, MockInstaller::new());
        h.pass().await.unwrap();
        assert_eq!(h.state(), State::Processing);
        assert_eq!(h.status().last_condition().unwrap().reason, "SpecChanged");
        assert_eq!(h.installer.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_verify_error_moves_to_error() {
        let h = Harness::new(
            resource_in(State::Ready, true),
            MockInstaller::new().with_verifies(vec![Err(Error::Installer("release missing".to_string()))]),
        );
        assert_eq!(h.pass().await.unwrap(), Action::await_change());
        assert_eq!(h.state(), State::Error);
    }
}
