//! Change propagation pipeline.
//!
//! # Data Flow
//! ```text
//!  ┌──────────────┐  try_send   ┌────────────────┐  recv   ┌───────────────────────────┐
//!  │ ConfigSource │ ──────────▶ │ bounded queue  │ ──────▶ │ consumer                  │
//!  │  .subscribe  │  (drop when │ (depth N, FIFO)│         │  overrides → Registry     │
//!  └──────┬───────┘    full)    └────────────────┘         │  .reload                  │
//!         │ fatal error                                     └─────────────┬─────────────┘
//!         └──────────────── oneshot fault ──────────────────────────▲    │ every event
//!                                                                         ▼
//!                                                               hook worker (in order)
//! ```
//!
//! # Design Decisions
//! - The producer owns the only sender; the queue closes when it returns
//! - The consumer survives failed reloads and panics inside them
//! - Cancellation is single-shot; the second signal is a no-op
//! - A producer fault is logged but does not stop request-serving code
//! - The change hook runs on its own worker, so a slow hook never delays
//!   the next reload

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{RuntimeOverrides, Snapshot};
use crate::lifecycle::shutdown::Canceller;
use crate::observability::metrics;
use crate::registry::{ReloadReport, Registry};
use crate::source::{ConfigSource, SourceError};

pub mod event;
pub mod state;

pub use event::ChangeEvent;
pub use state::{PipelineState, StateCell};

/// Default event queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// Callback run for every event the consumer takes off the queue.
///
/// Config events carry the applied snapshot (overrides merged) and the
/// reload report; other events carry no report. Calls happen in queue
/// order on a blocking thread.
pub type ChangeHook = Arc<dyn Fn(&ChangeEvent, Option<&ReloadReport>) + Send + Sync>;

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub queue_depth: usize,
    pub overrides: RuntimeOverrides,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            overrides: RuntimeOverrides::default(),
        }
    }
}

/// A source wired to a registry, not yet running.
pub struct Pipeline {
    source: Arc<dyn ConfigSource>,
    registry: Arc<Registry>,
    options: PipelineOptions,
    hook: Option<ChangeHook>,
    state: Arc<StateCell>,
}

impl Pipeline {
    pub fn new(source: Arc<dyn ConfigSource>, options: PipelineOptions) -> Self {
        Self {
            source,
            registry: Arc::new(Registry::new()),
            options,
            hook: None,
            state: Arc::new(StateCell::new()),
        }
    }

    /// Run `hook` for each event taken off the queue.
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ChangeEvent, Option<&ReloadReport>) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// Read the origin and build the initial components.
    ///
    /// Any error here is fatal: there is no earlier good state to fall back to.
    pub async fn init(&self) -> Result<ReloadReport, SourceError> {
        self.source.init().await?;
        let snapshot = self.source.current_snapshot()?;
        let report = self
            .registry
            .init(merge_overrides(&self.options.overrides, snapshot))
            .await;
        self.state.transition(PipelineState::Initialized);
        Ok(report)
    }

    /// Spawn the producer and consumer tasks, initializing first if needed.
    pub async fn start(self) -> Result<PipelineHandle, SourceError> {
        if self.state.get() == PipelineState::NotInitialized {
            self.init().await?;
        }

        let canceller = Canceller::new();
        let (events_tx, events_rx) = mpsc::channel(self.options.queue_depth.max(1));
        let (fault_tx, fault_rx) = oneshot::channel();
        self.state.transition(PipelineState::Watching);

        let producer = {
            let source = Arc::clone(&self.source);
            let state = Arc::clone(&self.state);
            let token = canceller.token();
            tokio::spawn(
                async move {
                    let result = source.subscribe(events_tx, token).await;
                    if let Err(e) = result {
                        let _ = fault_tx.send(e);
                    }
                    state.transition(PipelineState::Cancelled);
                }
                .in_current_span(),
            )
        };

        let consumer = tokio::spawn(
            Consumer {
                registry: Arc::clone(&self.registry),
                overrides: self.options.overrides.clone(),
                hook: self.hook.clone(),
                state: Arc::clone(&self.state),
            }
            .run(events_rx, fault_rx)
            .in_current_span(),
        );

        tracing::info!(
            origin = %self.source.origin(),
            queue_depth = self.options.queue_depth,
            "Pipeline started"
        );

        Ok(PipelineHandle {
            source: self.source,
            registry: self.registry,
            state: self.state,
            canceller,
            producer,
            consumer,
        })
    }
}

/// A running pipeline.
pub struct PipelineHandle {
    source: Arc<dyn ConfigSource>,
    registry: Arc<Registry>,
    state: Arc<StateCell>,
    canceller: Canceller,
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl PipelineHandle {
    /// Signal cancellation. Returns `false` if already signalled.
    pub fn cancel(&self) -> bool {
        let first = self.canceller.trigger();
        if first {
            self.state.transition(PipelineState::Cancelled);
            tracing::info!("Pipeline cancellation requested");
        }
        first
    }

    /// Wait for both tasks to finish. Call after [`PipelineHandle::cancel`].
    pub async fn join(self) {
        if let Err(e) = self.producer.await {
            tracing::error!(error = %e, "Producer task failed");
        }
        if let Err(e) = self.consumer.await {
            tracing::error!(error = %e, "Consumer task failed");
        }
        tracing::info!("Pipeline stopped");
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Last snapshot accepted by the origin (before overrides).
    pub fn current_snapshot(&self) -> Result<Arc<Snapshot>, SourceError> {
        self.source.current_snapshot()
    }

    /// Cancellation signal shared with the producer.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("origin", &self.source.origin())
            .field("state", &self.state.get())
            .finish()
    }
}

struct Consumer {
    registry: Arc<Registry>,
    overrides: RuntimeOverrides,
    hook: Option<ChangeHook>,
    state: Arc<StateCell>,
}

impl Consumer {
    async fn run(
        self,
        mut events: mpsc::Receiver<ChangeEvent>,
        mut fault: oneshot::Receiver<SourceError>,
    ) {
        let (notices, hook_worker) = match self.hook.clone() {
            Some(hook) => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(tokio::spawn(run_hook(hook, rx).in_current_span())))
            }
            None => (None, None),
        };

        let mut fault_seen = false;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        let notice = self.handle(event).await;
                        if let (Some(tx), Some(notice)) = (&notices, notice) {
                            let _ = tx.send(notice);
                        }
                    }
                    None => break,
                },
                result = &mut fault, if !fault_seen => {
                    fault_seen = true;
                    if let Ok(e) = result {
                        report_fault(&e);
                    }
                }
            }
        }
        if !fault_seen {
            if let Ok(e) = fault.try_recv() {
                report_fault(&e);
            }
        }

        drop(notices);
        if let Some(worker) = hook_worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Change hook worker failed");
            }
        }
        tracing::info!("Event queue closed, consumer exiting");
    }

    /// Apply one event. Returns what the change hook should see.
    async fn handle(&self, event: ChangeEvent) -> Option<HookNotice> {
        let snapshot = match event {
            ChangeEvent::Config(snapshot) => snapshot,
            other => {
                metrics::record_event("unsupported");
                tracing::warn!(event = ?other, "Unsupported event, skipping");
                return Some((other, None));
            }
        };

        self.state.transition(PipelineState::Reloading);
        let merged = merge_overrides(&self.overrides, snapshot);
        let revision = merged.revision();

        let outcome = AssertUnwindSafe(self.registry.reload(Arc::clone(&merged)))
            .catch_unwind()
            .await;

        let notice = match outcome {
            Ok(report) => {
                if report.is_clean() {
                    tracing::info!(revision, changed = ?report.changed(), "Reload applied");
                } else {
                    tracing::warn!(
                        revision,
                        failures = report.failures().len(),
                        report = %report,
                        "Reload applied with failures"
                    );
                }
                Some((ChangeEvent::Config(merged), Some(report)))
            }
            Err(panic) => {
                tracing::error!(revision, panic = %panic_message(&*panic), "Reload panicked");
                None
            }
        };
        self.state.transition(PipelineState::Watching);
        notice
    }
}

type HookNotice = (ChangeEvent, Option<ReloadReport>);

/// Feed notices to the hook one at a time, off the consumer.
async fn run_hook(hook: ChangeHook, mut notices: mpsc::UnboundedReceiver<HookNotice>) {
    while let Some((event, report)) = notices.recv().await {
        let hook = Arc::clone(&hook);
        let label = event.label();
        let called = tokio::task::spawn_blocking(move || hook(&event, report.as_ref())).await;
        if let Err(e) = called {
            if e.is_panic() {
                let panic = e.into_panic();
                tracing::error!(
                    event = label,
                    panic = %panic_message(&*panic),
                    "Change hook panicked"
                );
            } else {
                tracing::error!(event = label, error = %e, "Change hook task failed");
            }
        }
    }
}

fn report_fault(error: &SourceError) {
    tracing::error!(error = %error, "Config source failed, serving last applied configuration");
}

/// Apply runtime overrides, keeping the snapshot as-is when there are none.
fn merge_overrides(overrides: &RuntimeOverrides, snapshot: Arc<Snapshot>) -> Arc<Snapshot> {
    if overrides.is_empty() {
        return snapshot;
    }
    let config = overrides.apply(snapshot.config().clone());
    Arc::new(snapshot.with_config(config))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentKind;
    use crate::config::ConfigFormat;
    use crate::lifecycle::shutdown::CancelToken;
    use crate::source::cache::ContentCache;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_test::traced_test;

    const H1: &[u8] = br#"{"cache":{"enable":true,"host":"h1"}}"#;

    /// Source that forwards whatever the test pushes into it.
    struct ScriptedSource {
        cache: ContentCache,
        feed: Mutex<Option<mpsc::Receiver<ChangeEvent>>>,
        fail_with: Mutex<Option<SourceError>>,
    }

    impl ScriptedSource {
        fn new() -> (Arc<Self>, mpsc::Sender<ChangeEvent>) {
            let (tx, rx) = mpsc::channel(16);
            let source = Arc::new(Self {
                cache: ContentCache::new(ConfigFormat::Json),
                feed: Mutex::new(Some(rx)),
                fail_with: Mutex::new(None),
            });
            (source, tx)
        }

        fn snapshot(&self, raw: &[u8]) -> ChangeEvent {
            match self.cache.refresh(raw) {
                crate::source::Refresh::Updated(snapshot) => ChangeEvent::Config(snapshot),
                other => panic!("unexpected refresh outcome {:?}", other),
            }
        }
    }

    #[async_trait]
    impl ConfigSource for ScriptedSource {
        async fn init(&self) -> Result<(), SourceError> {
            self.cache.prime(H1)?;
            Ok(())
        }

        async fn subscribe(
            &self,
            events: mpsc::Sender<ChangeEvent>,
            mut cancel: CancelToken,
        ) -> Result<(), SourceError> {
            if let Some(e) = self.fail_with.lock().unwrap().take() {
                return Err(e);
            }
            let mut feed = self.feed.lock().unwrap().take().unwrap();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = feed.recv() => match next {
                        Some(event) => {
                            let _ = events.try_send(event);
                        }
                        None => break,
                    },
                }
            }
            Ok(())
        }

        fn current_snapshot(&self) -> Result<Arc<Snapshot>, SourceError> {
            self.cache.current().ok_or(SourceError::NotInitialized)
        }

        fn origin(&self) -> String {
            "scripted".to_string()
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never met");
    }

    #[tokio::test]
    async fn test_start_initializes_and_watches() {
        let (source, _feed) = ScriptedSource::new();
        let pipeline = Pipeline::new(source, PipelineOptions::default());
        assert_eq!(pipeline.state(), PipelineState::NotInitialized);

        let handle = pipeline.start().await.unwrap();
        assert_eq!(handle.state(), PipelineState::Watching);
        assert_eq!(handle.registry().cache().unwrap().host(), "h1");

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert_eq!(handle.state(), PipelineState::Cancelled);
        handle.join().await;
    }

    #[tokio::test]
    async fn test_overrides_win_over_origin() {
        let (source, feed) = ScriptedSource::new();
        let options = PipelineOptions {
            overrides: RuntimeOverrides {
                log_level: "debug".into(),
                port: 9000,
                ..Default::default()
            },
            ..Default::default()
        };
        let handle = Pipeline::new(source.clone(), options).start().await.unwrap();
        let applied = handle.registry().snapshot().unwrap();
        assert_eq!(applied.config().logging.level, "debug");
        assert_eq!(applied.config().discovery.server_port, 9000);
        assert_eq!(handle.current_snapshot().unwrap().config().logging.level, "");

        let raw = br#"{"log_conf":{"level":"error"},"cache":{"enable":true,"host":"h1"}}"#;
        feed.send(source.snapshot(raw)).await.unwrap();
        wait_until(|| handle.registry().snapshot().unwrap().revision() == 2).await;
        assert_eq!(handle.registry().snapshot().unwrap().config().logging.level, "debug");

        handle.cancel();
        handle.join().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unsupported_event_and_panicking_hook_do_not_stop_consumer() {
        let (source, feed) = ScriptedSource::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(source.clone(), PipelineOptions::default()).with_hook({
            let calls = Arc::clone(&calls);
            move |event: &ChangeEvent, _report: Option<&ReloadReport>| {
                calls.fetch_add(1, Ordering::SeqCst);
                let host = event.snapshot().map(|s| s.config().cache.host.clone());
                if host.as_deref() == Some("boom") {
                    panic!("hook exploded");
                }
            }
        });
        let handle = pipeline.start().await.unwrap();

        feed.send(ChangeEvent::Other(serde_json::json!({"kind": "ping"}))).await.unwrap();
        feed.send(source.snapshot(br#"{"cache":{"enable":true,"host":"boom"}}"#))
            .await
            .unwrap();
        feed.send(source.snapshot(br#"{"cache":{"enable":true,"host":"h2"}}"#))
            .await
            .unwrap();

        wait_until(|| calls.load(Ordering::SeqCst) == 3).await;
        wait_until(|| handle.state() == PipelineState::Watching).await;
        assert_eq!(handle.registry().cache().unwrap().host(), "h2");
        assert!(logs_contain("Unsupported event"));
        assert!(logs_contain("hook exploded"));

        handle.cancel();
        handle.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[traced_test]
    async fn test_event_queued_before_start_is_reloaded_from_watching() {
        let (source, feed) = ScriptedSource::new();
        feed.send(source.snapshot(br#"{"cache":{"enable":true,"host":"h2"}}"#))
            .await
            .unwrap();

        let handle = Pipeline::new(source, PipelineOptions::default())
            .start()
            .await
            .unwrap();
        wait_until(|| handle.registry().snapshot().unwrap().revision() == 2).await;
        wait_until(|| handle.state() == PipelineState::Watching).await;

        assert!(logs_contain("to=reloading"));
        assert!(!logs_contain("transition refused"));

        handle.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_slow_hook_does_not_delay_reloads() {
        let (source, feed) = ScriptedSource::new();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(source.clone(), PipelineOptions::default()).with_hook({
            let seen = Arc::clone(&seen);
            move |event: &ChangeEvent, report: Option<&ReloadReport>| {
                let _ = release_rx.lock().unwrap().recv();
                seen.lock().unwrap().push((event.label(), report.is_some()));
            }
        });
        let handle = pipeline.start().await.unwrap();

        feed.send(source.snapshot(br#"{"cache":{"enable":true,"host":"h2"}}"#))
            .await
            .unwrap();
        feed.send(ChangeEvent::Other(serde_json::json!({"kind": "ping"}))).await.unwrap();
        feed.send(source.snapshot(br#"{"cache":{"enable":true,"host":"h3"}}"#))
            .await
            .unwrap();

        // The hook is still blocked on the first event.
        wait_until(|| handle.registry().cache().unwrap().host() == "h3").await;
        assert!(seen.lock().unwrap().is_empty());

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        handle.cancel();
        handle.join().await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("config", true), ("other", false), ("config", true)]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_producer_fault_is_reported() {
        let (source, _feed) = ScriptedSource::new();
        *source.fail_with.lock().unwrap() = Some(SourceError::Watch("stream reset".into()));

        let handle = Pipeline::new(source, PipelineOptions::default())
            .start()
            .await
            .unwrap();
        wait_until(|| handle.state() == PipelineState::Cancelled).await;
        assert!(handle.registry().is_live(ComponentKind::Cache));
        handle.join().await;
        assert!(logs_contain("Config source failed"));
    }

    #[tokio::test]
    async fn test_init_failure_is_fatal() {
        struct Broken;

        #[async_trait]
        impl ConfigSource for Broken {
            async fn init(&self) -> Result<(), SourceError> {
                Err(SourceError::KeyNotFound("/app".into()))
            }
            async fn subscribe(
                &self,
                _events: mpsc::Sender<ChangeEvent>,
                _cancel: CancelToken,
            ) -> Result<(), SourceError> {
                Ok(())
            }
            fn current_snapshot(&self) -> Result<Arc<Snapshot>, SourceError> {
                Err(SourceError::NotInitialized)
            }
            fn origin(&self) -> String {
                "broken".to_string()
            }
        }

        let pipeline = Pipeline::new(Arc::new(Broken), PipelineOptions::default());
        assert!(matches!(pipeline.init().await, Err(SourceError::KeyNotFound(_))));
        assert_eq!(pipeline.state(), PipelineState::NotInitialized);
    }
}
