// Lifecycle controller.
//
// Dispatches install, activate and fetch events to an injected
// LifecycleHandler. The handler's future is the unit of sequencing: the
// controller only moves to the next state once that future settles, and
// rolls back to the previous stable state when it fails or is dropped, so the
// event can simply be dispatched again.
//
//   Parsed --install--> Installing --ok--> Installed --activate--> Activating --ok--> Activated
//      ^                    |                  ^                        |
//      +----err/drop--------+                  +--------err/drop--------+

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::config::{AssetManifest, CacheConfig};
use crate::engine::interceptor::{Interception, RequestInterceptor};
use crate::engine::reaper::GenerationReaper;
use crate::engine::resolver::FetchResolver;
use crate::engine::stats::{StatsCollector, StatsSnapshot};
use crate::engine::warmer::{AssetWarmer, WarmReport};
use crate::error::{CacheError, CacheResult};
use crate::model::CacheRequest;
use crate::network::traits::Network;
use crate::store::CacheStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Install,
    Activate,
    Fetch(CacheRequest),
}

pub enum EventOutcome {
    Installed(WarmReport),
    /// Names of the generations that were deleted.
    Activated(Vec<String>),
    Responded(Interception),
}

#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    async fn on_install(&self) -> CacheResult<WarmReport>;
    async fn on_activate(&self) -> CacheResult<Vec<String>>;
    async fn on_fetch(&self, request: &CacheRequest) -> CacheResult<Interception>;
}

pub struct LifecycleController<H> {
    handler: H,
    state: Mutex<WorkerState>,
}

impl<H: LifecycleHandler> LifecycleController<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            state: Mutex::new(WorkerState::Parsed),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub async fn dispatch(&self, event: LifecycleEvent) -> CacheResult<EventOutcome> {
        match event {
            LifecycleEvent::Install => self.install().await.map(EventOutcome::Installed),
            LifecycleEvent::Activate => self.activate().await.map(EventOutcome::Activated),
            LifecycleEvent::Fetch(request) => {
                self.fetch(&request).await.map(EventOutcome::Responded)
            }
        }
    }

    /// Swap in `next` if the current state is one of `from`; returns the previous state.
    fn transition(&self, from: &[WorkerState], next: WorkerState) -> CacheResult<WorkerState> {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return Err(CacheError::lifecycle(format!(
                "cannot enter {:?} from {:?}",
                next, *state
            )));
        }
        let previous = *state;
        *state = next;
        Ok(previous)
    }

    pub async fn install(&self) -> CacheResult<WarmReport> {
        let previous = self.transition(
            &[WorkerState::Parsed, WorkerState::Installed],
            WorkerState::Installing,
        )?;
        let pending = PendingTransition::new(&self.state, previous);
        info!("install: warming assets");

        match self.handler.on_install().await {
            Ok(report) => {
                pending.complete(WorkerState::Installed);
                Ok(report)
            }
            Err(e) => {
                warn!("install failed, retry by dispatching install again: {}", e);
                Err(e)
            }
        }
    }

    pub async fn activate(&self) -> CacheResult<Vec<String>> {
        let previous = self.transition(
            &[WorkerState::Installed, WorkerState::Activated],
            WorkerState::Activating,
        )?;
        let pending = PendingTransition::new(&self.state, previous);
        info!("activate: reaping stale generations");

        match self.handler.on_activate().await {
            Ok(deleted) => {
                pending.complete(WorkerState::Activated);
                Ok(deleted)
            }
            Err(e) => {
                warn!("activate failed, retry by dispatching activate again: {}", e);
                Err(e)
            }
        }
    }

    /// Treat a generation left complete by an earlier run as installed.
    ///
    /// Only valid from `Parsed`; the caller is responsible for checking that
    /// the generation really holds every manifest asset.
    pub fn adopt_installed(&self) -> CacheResult<()> {
        self.transition(&[WorkerState::Parsed], WorkerState::Installed)?;
        info!("install: adopted existing generation");
        Ok(())
    }

    /// Fetch events are answered once activation has started.
    pub async fn fetch(&self, request: &CacheRequest) -> CacheResult<Interception> {
        let state = self.state();
        if !matches!(state, WorkerState::Activating | WorkerState::Activated) {
            return Err(CacheError::lifecycle(format!(
                "fetch for {} while {:?}",
                request.url, state
            )));
        }
        debug!("fetch: {} {}", request.method, request.url);
        self.handler.on_fetch(request).await
    }
}

/// Restores the previous stable state on drop unless completed.
struct PendingTransition<'a> {
    state: &'a Mutex<WorkerState>,
    rollback: WorkerState,
    done: bool,
}

impl<'a> PendingTransition<'a> {
    fn new(state: &'a Mutex<WorkerState>, rollback: WorkerState) -> Self {
        Self {
            state,
            rollback,
            done: false,
        }
    }

    fn complete(mut self, next: WorkerState) {
        *self.state.lock() = next;
        self.done = true;
    }
}

impl Drop for PendingTransition<'_> {
    fn drop(&mut self) {
        if !self.done {
            debug!("rolling back to {:?}", self.rollback);
            *self.state.lock() = self.rollback;
        }
    }
}

/// The standard handler: warm on install, reap on activate, intercept on fetch.
pub struct CacheWorker {
    version: String,
    manifest: AssetManifest,
    store: CacheStore,
    stats: Arc<StatsCollector>,
    warmer: AssetWarmer,
    reaper: GenerationReaper,
    interceptor: RequestInterceptor,
}

impl CacheWorker {
    pub fn new(
        config: &CacheConfig,
        network: Arc<dyn Network>,
        store: CacheStore,
    ) -> CacheResult<Self> {
        config.validate()?;
        let scope = config.scope_url()?;
        let stats = Arc::new(StatsCollector::new());
        let resolver = Arc::new(FetchResolver::new(network, Arc::clone(&stats)));

        let mut interceptor = RequestInterceptor::new(
            Arc::clone(&resolver),
            store.clone(),
            config.version.clone(),
            Arc::clone(&stats),
        );
        if let Some(fallback) = &config.fallback_url {
            let url: Url = scope.join(fallback).map_err(|e| CacheError::InvalidUrl {
                url: fallback.clone(),
                reason: e.to_string(),
            })?;
            interceptor = interceptor.with_fallback(&url);
        }

        Ok(Self {
            version: config.version.clone(),
            manifest: config.manifest.clone(),
            warmer: AssetWarmer::new(resolver, store.clone(), scope),
            reaper: GenerationReaper::new(store.clone()),
            interceptor,
            store,
            stats,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the current generation already holds every manifest asset.
    pub async fn has_warm_generation(&self) -> CacheResult<bool> {
        self.warmer.is_warm(&self.manifest, &self.version).await
    }
}

#[async_trait]
impl LifecycleHandler for CacheWorker {
    async fn on_install(&self) -> CacheResult<WarmReport> {
        self.warmer.warm(&self.manifest, &self.version).await
    }

    async fn on_activate(&self) -> CacheResult<Vec<String>> {
        self.reaper.reap(&self.version).await
    }

    async fn on_fetch(&self, request: &CacheRequest) -> CacheResult<Interception> {
        self.interceptor.intercept(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::engine::interceptor::ResponseSource;
    use crate::model::CachedResponse;

    /// Handler that counts calls and fails on demand.
    #[derive(Default)]
    struct ProbeHandler {
        fail: AtomicBool,
        stall: AtomicBool,
        installs: AtomicUsize,
        activations: AtomicUsize,
    }

    impl ProbeHandler {
        async fn maybe_stall(&self) {
            if self.stall.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    }

    #[async_trait]
    impl LifecycleHandler for ProbeHandler {
        async fn on_install(&self) -> CacheResult<WarmReport> {
            self.installs.fetch_add(1, Ordering::SeqCst);
            self.maybe_stall().await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(CacheError::store("boom"));
            }
            Ok(WarmReport {
                generation: "v1".to_string(),
                cached: 0,
            })
        }

        async fn on_activate(&self) -> CacheResult<Vec<String>> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            self.maybe_stall().await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(CacheError::store("boom"));
            }
            Ok(Vec::new())
        }

        async fn on_fetch(&self, request: &CacheRequest) -> CacheResult<Interception> {
            Ok(Interception {
                response: CachedResponse::new(request.url.as_str(), 200, "probe"),
                source: ResponseSource::Network,
                persist: None,
            })
        }
    }

    fn request() -> CacheRequest {
        CacheRequest::parse("http://app.local/a").unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_transitions() {
        let controller = LifecycleController::new(ProbeHandler::default());
        assert_eq!(controller.state(), WorkerState::Parsed);

        controller.dispatch(LifecycleEvent::Install).await.unwrap();
        assert_eq!(controller.state(), WorkerState::Installed);

        controller.dispatch(LifecycleEvent::Activate).await.unwrap();
        assert_eq!(controller.state(), WorkerState::Activated);

        let outcome = controller
            .dispatch(LifecycleEvent::Fetch(request()))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Responded(_)));
    }

    #[tokio::test]
    async fn test_failed_install_rolls_back_and_retries() {
        let controller = LifecycleController::new(ProbeHandler::default());
        controller.handler().fail.store(true, Ordering::SeqCst);

        assert!(controller.install().await.is_err());
        assert_eq!(controller.state(), WorkerState::Parsed);

        controller.handler().fail.store(false, Ordering::SeqCst);
        controller.install().await.unwrap();
        assert_eq!(controller.state(), WorkerState::Installed);
        assert_eq!(controller.handler().installs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_activate_stays_installed() {
        let controller = LifecycleController::new(ProbeHandler::default());
        controller.install().await.unwrap();
        controller.handler().fail.store(true, Ordering::SeqCst);

        assert!(controller.activate().await.is_err());
        assert_eq!(controller.state(), WorkerState::Installed);
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let controller = LifecycleController::new(ProbeHandler::default());
        assert!(matches!(
            controller.activate().await,
            Err(CacheError::Lifecycle { .. })
        ));
        assert_eq!(controller.handler().activations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_before_activation_is_rejected() {
        let controller = LifecycleController::new(ProbeHandler::default());
        controller.install().await.unwrap();
        assert!(matches!(
            controller.fetch(&request()).await,
            Err(CacheError::Lifecycle { .. })
        ));
    }

    #[tokio::test]
    async fn test_activate_can_be_repeated() {
        let controller = LifecycleController::new(ProbeHandler::default());
        controller.install().await.unwrap();
        controller.activate().await.unwrap();
        controller.activate().await.unwrap();
        assert_eq!(controller.state(), WorkerState::Activated);
        assert_eq!(controller.handler().activations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_install_can_be_dispatched_again() {
        let controller = LifecycleController::new(ProbeHandler::default());
        controller.handler().stall.store(true, Ordering::SeqCst);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), controller.install()).await;
        assert!(abandoned.is_err());
        assert_eq!(controller.state(), WorkerState::Parsed);

        controller.handler().stall.store(false, Ordering::SeqCst);
        controller.install().await.unwrap();
        assert_eq!(controller.state(), WorkerState::Installed);
    }

    #[tokio::test]
    async fn test_dropped_activate_returns_to_installed() {
        let controller = LifecycleController::new(ProbeHandler::default());
        controller.install().await.unwrap();
        controller.handler().stall.store(true, Ordering::SeqCst);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), controller.activate()).await;
        assert!(abandoned.is_err());
        assert_eq!(controller.state(), WorkerState::Installed);

        controller.handler().stall.store(false, Ordering::SeqCst);
        controller.activate().await.unwrap();
        assert_eq!(controller.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_adopt_installed_only_from_parsed() {
        let controller = LifecycleController::new(ProbeHandler::default());
        controller.adopt_installed().unwrap();
        assert_eq!(controller.state(), WorkerState::Installed);
        assert!(matches!(
            controller.adopt_installed(),
            Err(CacheError::Lifecycle { .. })
        ));

        controller.activate().await.unwrap();
        assert_eq!(controller.handler().installs.load(Ordering::SeqCst), 0);
    }
}
