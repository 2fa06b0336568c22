//! In-memory fakes for the adapter traits (testing only)
//!
//! Provides `FakeRuntime`, `FakeFetcher`, `FakeCredentials` and
//! `FakeTerminal`, which record every call so tests can assert ordering,
//! registration and teardown without docker, git or ssh.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::LiveRegistry;
use crate::domain::{PipelineSpec, SourceRef};

use super::{
    ContainerConfig, ContainerRuntime, CredentialProvisioner, SourceFetcher, TerminalController,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// FakeRuntime
// ---------------------------------------------------------------------------

/// A recorded runtime call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    BuildAndRun {
        spec: String,
        config: ContainerConfig,
        /// Registry contents when the call was made
        registered: Vec<String>,
    },
    StartByReference {
        spec: String,
        image: String,
        config: ContainerConfig,
        registered: Vec<String>,
    },
    Kill {
        container_id: String,
    },
}

impl RuntimeCall {
    /// Config of a start call, `None` for kills
    pub fn config(&self) -> Option<&ContainerConfig> {
        match self {
            Self::BuildAndRun { config, .. } | Self::StartByReference { config, .. } => {
                Some(config)
            }
            Self::Kill { .. } => None,
        }
    }

    pub fn spec(&self) -> Option<&str> {
        match self {
            Self::BuildAndRun { spec, .. } | Self::StartByReference { spec, .. } => Some(spec),
            Self::Kill { .. } => None,
        }
    }

    pub fn registered(&self) -> &[String] {
        match self {
            Self::BuildAndRun { registered, .. } | Self::StartByReference { registered, .. } => {
                registered
            }
            Self::Kill { .. } => &[],
        }
    }

    pub fn is_kill(&self) -> bool {
        matches!(self, Self::Kill { .. })
    }
}

type FailPredicate = Box<dyn Fn(&PipelineSpec, &ContainerConfig) -> bool + Send + Sync>;

/// Container runtime that hands out ids like `orders-3` and records calls.
///
/// Blocking containers are treated as exited once the call returns, and a
/// failed start never ran, so a later kill of either fails the way
/// `docker kill` does.
#[derive(Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    started: Mutex<Vec<String>>,
    exited: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
    fail_when: Mutex<Option<FailPredicate>>,
    observed: Mutex<Option<Arc<LiveRegistry>>>,
    kill_delay: Mutex<Option<Duration>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any start call matching the predicate. The predicate runs while
    /// the call is in flight.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&PipelineSpec, &ContainerConfig) -> bool + Send + Sync + 'static,
    {
        *lock(&self.fail_when) = Some(Box::new(predicate));
    }

    /// Snapshot this registry's containers on every start call
    pub fn observe(&self, registry: Arc<LiveRegistry>) {
        *lock(&self.observed) = Some(registry);
    }

    /// Make every kill take this long
    pub fn set_kill_delay(&self, delay: Duration) {
        *lock(&self.kill_delay) = Some(delay);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        lock(&self.calls).clone()
    }

    /// Start calls only, in order
    pub fn start_calls(&self) -> Vec<RuntimeCall> {
        self.calls().into_iter().filter(|c| !c.is_kill()).collect()
    }

    /// Container ids passed to `kill`, in order
    pub fn killed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Kill { container_id } => Some(container_id),
                _ => None,
            })
            .collect()
    }

    /// Ids returned by successful start calls
    pub fn started(&self) -> Vec<String> {
        lock(&self.started).clone()
    }

    fn snapshot(&self) -> Vec<String> {
        lock(&self.observed)
            .as_ref()
            .map(|registry| registry.containers())
            .unwrap_or_default()
    }

    fn start(
        &self,
        spec: &PipelineSpec,
        config: &ContainerConfig,
        call: RuntimeCall,
    ) -> Result<String> {
        lock(&self.calls).push(call);
        let id = config
            .name
            .clone()
            .unwrap_or_else(|| self.reserve_id(spec));

        let failed = lock(&self.fail_when)
            .as_ref()
            .is_some_and(|predicate| predicate(spec, config));
        if failed {
            lock(&self.exited).insert(id);
            anyhow::bail!("container for '{}' exited with code 1", spec.name);
        }

        lock(&self.started).push(id.clone());
        if config.is_blocking() {
            lock(&self.exited).insert(id.clone());
        }
        Ok(id)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    fn reserve_id(&self, spec: &PipelineSpec) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", spec.name, n)
    }

    async fn build_and_run(&self, spec: &PipelineSpec, config: &ContainerConfig) -> Result<String> {
        let call = RuntimeCall::BuildAndRun {
            spec: spec.name.clone(),
            config: config.clone(),
            registered: self.snapshot(),
        };
        self.start(spec, config, call)
    }

    async fn start_by_reference(
        &self,
        spec: &PipelineSpec,
        image: &str,
        config: &ContainerConfig,
    ) -> Result<String> {
        let call = RuntimeCall::StartByReference {
            spec: spec.name.clone(),
            image: image.to_string(),
            config: config.clone(),
            registered: self.snapshot(),
        };
        self.start(spec, config, call)
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        lock(&self.calls).push(RuntimeCall::Kill {
            container_id: container_id.to_string(),
        });

        let delay = *lock(&self.kill_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !lock(&self.exited).insert(container_id.to_string()) {
            anyhow::bail!("container {} is not running", container_id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeFetcher
// ---------------------------------------------------------------------------

/// Source fetcher backed by a map of specs, with scripted failures
#[derive(Debug, Default)]
pub struct FakeFetcher {
    specs: Mutex<HashMap<SourceRef, PipelineSpec>>,
    failures: Mutex<HashMap<SourceRef, VecDeque<String>>>,
    fetches: Mutex<Vec<SourceRef>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the spec served for `source`
    pub fn with_spec(self, source: impl Into<SourceRef>, spec: PipelineSpec) -> Self {
        lock(&self.specs).insert(source.into(), spec);
        self
    }

    /// Make the next fetch of `source` fail with `message`
    pub fn fail_next(&self, source: impl Into<SourceRef>, message: impl Into<String>) {
        lock(&self.failures)
            .entry(source.into())
            .or_default()
            .push_back(message.into());
    }

    /// Every fetch attempt, in order
    pub fn fetches(&self) -> Vec<SourceRef> {
        lock(&self.fetches).clone()
    }

    pub fn fetch_count(&self, source: impl Into<SourceRef>) -> usize {
        let source = source.into();
        lock(&self.fetches).iter().filter(|s| **s == source).count()
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch_spec(
        &self,
        source: &SourceRef,
        _key_path: Option<&Path>,
    ) -> Result<PipelineSpec> {
        lock(&self.fetches).push(source.clone());

        let failure = lock(&self.failures)
            .get_mut(source)
            .and_then(|queue| queue.pop_front());
        if let Some(message) = failure {
            anyhow::bail!("{}", message);
        }

        lock(&self.specs)
            .get(source)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("repository '{}' not found", source))
    }
}

// ---------------------------------------------------------------------------
// FakeCredentials / FakeTerminal
// ---------------------------------------------------------------------------

/// Credential provisioner that counts calls
#[derive(Debug, Default)]
pub struct FakeCredentials {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provisioner whose setup always fails
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvisioner for FakeCredentials {
    async fn set_up(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("ssh-add failed: no identities");
        }
        Ok(())
    }
}

/// Terminal controller that counts restores
#[derive(Debug, Default)]
pub struct FakeTerminal {
    restores: AtomicUsize,
}

impl FakeTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TerminalController for FakeTerminal {
    async fn restore_state(&self) {
        self.restores.fetch_add(1, Ordering::SeqCst);
    }
}
