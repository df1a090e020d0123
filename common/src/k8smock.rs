//! In-memory stand-ins for the cluster and the installer, used by tests.
use crate::{
    ChartInstall, ChartInstallSpec, CustomObject, Error, InstallInfo, Installer, ResourceKey, ResourceStore,
    Result, State, installinfo::ChartInfo,
};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Client, ResourceExt, api::DynamicObject};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Client pointing nowhere; building it needs a tokio runtime
pub fn test_client() -> Client {
    let config = kube::Config::new("http://127.0.0.1:6443".parse().expect("valid test url"));
    Client::try_from(config).expect("offline client")
}

pub fn chart_install(namespace: &str, name: &str, spec: ChartInstallSpec) -> ChartInstall {
    let mut ci = ChartInstall::new(name, spec);
    ci.metadata.namespace = Some(namespace.to_string());
    ci.metadata.uid = Some(format!("uid-{namespace}-{name}"));
    ci
}

pub fn nginx_spec() -> ChartInstallSpec {
    ChartInstallSpec {
        chart_path: "./charts/nginx".to_string(),
        release_name: "nginx".to_string(),
        chart_flags: "replicaCount=2".to_string(),
    }
}

pub fn generic(obj: &ChartInstall) -> DynamicObject {
    obj.to_generic().expect("generic conversion")
}

struct MemoryState<K> {
    objects: HashMap<ResourceKey, K>,
    version: u64,
    pending_conflicts: usize,
    history: Vec<State>,
    updates: usize,
    status_updates: usize,
}

/// Resource store with resource-version checks, like the API server.
///
/// Objects whose deletion was requested are dropped as soon as their last
/// finalizer is removed.
pub struct MemoryStore<K> {
    state: Mutex<MemoryState<K>>,
}

impl<K: CustomObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CustomObject> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                objects: HashMap::new(),
                version: 0,
                pending_conflicts: 0,
                history: Vec::new(),
                updates: 0,
                status_updates: 0,
            }),
        }
    }

    pub fn insert(&self, mut obj: K) -> K {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        obj.meta_mut().resource_version = Some(state.version.to_string());
        state.objects.insert(ResourceKey::from_resource(&obj), obj.clone());
        obj
    }

    pub fn current(&self, key: &ResourceKey) -> Option<K> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    /// The next `count` writes fail with a conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.state.lock().unwrap().pending_conflicts = count;
    }

    /// Simulate a concurrent writer by bumping the stored resource version
    pub fn touch(&self, key: &ResourceKey) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version.to_string();
        if let Some(obj) = state.objects.get_mut(key) {
            obj.meta_mut().resource_version = Some(version);
        }
    }

    pub fn mark_for_deletion(&self, key: &ResourceKey) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version.to_string();
        let gone = match state.objects.get_mut(key) {
            Some(obj) => {
                obj.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
                obj.meta_mut().resource_version = Some(version);
                obj.finalizers().is_empty()
            }
            None => false,
        };
        if gone {
            state.objects.remove(key);
        }
    }

    /// Committed states, in commit order
    pub fn history(&self) -> Vec<State> {
        self.state.lock().unwrap().history.clone()
    }

    pub fn update_count(&self) -> usize {
        self.state.lock().unwrap().updates
    }

    pub fn status_update_count(&self) -> usize {
        self.state.lock().unwrap().status_updates
    }

    fn check_write(state: &mut MemoryState<K>, obj: &K) -> Result<ResourceKey> {
        let key = ResourceKey::from_resource(obj);
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(Error::Conflict(key.to_string()));
        }
        let stored = state
            .objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if stored.resource_version() != obj.resource_version() {
            return Err(Error::Conflict(key.to_string()));
        }
        Ok(key)
    }
}

#[async_trait]
impl<K: CustomObject> ResourceStore<K> for MemoryStore<K> {
    async fn get(&self, key: &ResourceKey) -> Result<K> {
        self.current(key).ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        let key = Self::check_write(&mut state, obj)?;
        state.version += 1;
        state.updates += 1;
        let version = state.version.to_string();
        let Some(stored) = state.objects.get_mut(&key) else {
            return Err(Error::NotFound(key.to_string()));
        };
        stored.meta_mut().labels = obj.meta().labels.clone();
        stored.meta_mut().finalizers = obj.meta().finalizers.clone();
        stored.meta_mut().resource_version = Some(version);
        let result = stored.clone();
        if result.deletion_requested() && result.finalizers().is_empty() {
            state.objects.remove(&key);
        }
        Ok(result)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        let key = Self::check_write(&mut state, obj)?;
        let status = obj.get_status()?;
        state.version += 1;
        state.status_updates += 1;
        state.history.push(status.state);
        let version = state.version.to_string();
        let Some(stored) = state.objects.get_mut(&key) else {
            return Err(Error::NotFound(key.to_string()));
        };
        stored.set_status(status)?;
        stored.meta_mut().resource_version = Some(version);
        Ok(stored.clone())
    }
}

/// Installer answering from scripted queues; an empty queue answers `Ok(true)`
#[derive(Default)]
pub struct MockInstaller {
    installs: Mutex<VecDeque<Result<bool>>>,
    uninstalls: Mutex<VecDeque<Result<bool>>>,
    verifies: Mutex<VecDeque<Result<bool>>>,
    install_calls: AtomicUsize,
    uninstall_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    last_chart: Mutex<Option<ChartInfo>>,
}

impl MockInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_installs(self, results: Vec<Result<bool>>) -> Self {
        *self.installs.lock().unwrap() = results.into();
        self
    }

    #[must_use]
    pub fn with_uninstalls(self, results: Vec<Result<bool>>) -> Self {
        *self.uninstalls.lock().unwrap() = results.into();
        self
    }

    #[must_use]
    pub fn with_verifies(self, results: Vec<Result<bool>>) -> Self {
        *self.verifies.lock().unwrap() = results.into();
        self
    }

    pub fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }

    pub fn uninstall_calls(&self) -> usize {
        self.uninstall_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn last_chart(&self) -> Option<ChartInfo> {
        self.last_chart.lock().unwrap().clone()
    }

    fn answer(&self, queue: &Mutex<VecDeque<Result<bool>>>, info: &InstallInfo) -> Result<bool> {
        *self.last_chart.lock().unwrap() = Some(info.chart.clone());
        queue.lock().unwrap().pop_front().unwrap_or(Ok(true))
    }
}

#[async_trait]
impl Installer for MockInstaller {
    async fn install(&self, info: &InstallInfo) -> Result<bool> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.installs, info)
    }

    async fn uninstall(&self, info: &InstallInfo) -> Result<bool> {
        self.uninstall_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.uninstalls, info)
    }

    async fn verify(&self, info: &InstallInfo) -> Result<bool> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(&self.verifies, info)
    }
}
