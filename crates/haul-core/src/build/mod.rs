//! Build state tracking.
//!
//! The tracker turns the compiler's `invalidated` / `done` events into a
//! small state machine (`idle → compiling → clean | dirty`) and fans each
//! event out to registered listeners, synchronously and in registration
//! order. Request handlers read the current status or wait for the next
//! completion through the same tracker.

mod stats;

pub use stats::{content_type_for, Artifact, BuildStats};

use crate::error::ListenerError;
use haul_protocol::BuildStatus;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Capacity of the completion broadcast.
const COMPLETION_CAPACITY: usize = 16;

/// A lifecycle event emitted by the compiler.
#[derive(Debug, Clone)]
pub enum CompilerEvent {
    /// Sources changed and a rebuild started.
    Invalidated,
    /// A build finished.
    Done(BuildStats),
}

/// Phase of the build state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// No event received yet.
    Idle,
    /// A rebuild is in flight.
    Compiling,
    /// Last build finished without issues.
    Clean,
    /// Last build finished with errors or warnings.
    Dirty,
}

/// Receives build lifecycle notifications.
pub trait BuildListener: Send + Sync {
    /// Listener name used in diagnostics.
    fn name(&self) -> &str;

    /// A rebuild started. `compiling_after_error` tells whether the previous
    /// completed build had errors or warnings.
    fn on_invalid(&self, _compiling_after_error: bool) -> Result<(), ListenerError> {
        Ok(())
    }

    /// A build finished.
    fn on_compile(&self, _stats: &Arc<BuildStats>) -> Result<(), ListenerError> {
        Ok(())
    }
}

struct TrackerState {
    phase: BuildPhase,
    had_issues: bool,
    latest: Option<Arc<BuildStats>>,
    generation: u64,
}

/// Tracks compiler state and notifies listeners.
pub struct BuildStateTracker {
    state: Mutex<TrackerState>,
    listeners: RwLock<Vec<Arc<dyn BuildListener>>>,
    completions: broadcast::Sender<Arc<BuildStats>>,
}

impl BuildStateTracker {
    /// Create a tracker in the idle phase.
    #[must_use]
    pub fn new() -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CAPACITY);
        Self {
            state: Mutex::new(TrackerState {
                phase: BuildPhase::Idle,
                had_issues: false,
                latest: None,
                generation: 0,
            }),
            listeners: RwLock::new(Vec::new()),
            completions,
        }
    }

    /// Register a listener. Listeners are notified in registration order.
    pub fn add_listener(&self, listener: Arc<dyn BuildListener>) {
        debug!(listener = listener.name(), "Build listener registered");
        self.listeners.write().push(listener);
    }

    /// Handle the compiler's `invalidated` event.
    pub fn on_invalidated(&self) {
        let compiling_after_error = {
            let mut state = self.state.lock();
            state.phase = BuildPhase::Compiling;
            state.had_issues
        };

        debug!(compiling_after_error, "Build invalidated");

        for listener in self.listeners_snapshot() {
            if let Err(e) = listener.on_invalid(compiling_after_error) {
                warn!(listener = listener.name(), error = %e, "Listener failed on invalid");
            }
        }
    }

    /// Handle the compiler's `done` event.
    pub fn on_done(&self, stats: BuildStats) {
        let stats = Arc::new(stats);
        let has_issues = stats.has_issues();

        let generation = {
            let mut state = self.state.lock();
            state.had_issues = has_issues;
            state.phase = if has_issues {
                BuildPhase::Dirty
            } else {
                BuildPhase::Clean
            };
            state.latest = Some(Arc::clone(&stats));
            state.generation += 1;
            state.generation
        };

        info!(
            hash = %stats.hash,
            status = %stats.status(),
            errors = stats.errors.len(),
            warnings = stats.warnings.len(),
            generation,
            "Build finished"
        );

        // No receivers just means nobody is waiting.
        let _ = self.completions.send(Arc::clone(&stats));

        for listener in self.listeners_snapshot() {
            if let Err(e) = listener.on_compile(&stats) {
                warn!(listener = listener.name(), error = %e, "Listener failed on compile");
            }
        }
    }

    /// Apply one compiler event.
    pub fn apply(&self, event: CompilerEvent) {
        match event {
            CompilerEvent::Invalidated => self.on_invalidated(),
            CompilerEvent::Done(stats) => self.on_done(stats),
        }
    }

    /// Apply compiler events in arrival order until the sender closes.
    pub async fn run(&self, mut events: mpsc::Receiver<CompilerEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
        debug!("Compiler event stream closed");
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> BuildPhase {
        self.state.lock().phase
    }

    /// Current status. Reports `Compiling` until the first build finishes.
    #[must_use]
    pub fn status(&self) -> BuildStatus {
        let state = self.state.lock();
        match (state.phase, &state.latest) {
            (BuildPhase::Idle | BuildPhase::Compiling, _) => BuildStatus::Compiling,
            (_, Some(stats)) => stats.status(),
            (_, None) => BuildStatus::Compiling,
        }
    }

    /// Whether the last completed build had errors or warnings.
    #[must_use]
    pub fn had_issues(&self) -> bool {
        self.state.lock().had_issues
    }

    /// Stats of the last completed build.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<BuildStats>> {
        self.state.lock().latest.clone()
    }

    /// Number of completed builds.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Number of requests currently waiting for a completion.
    #[must_use]
    pub fn pending_waiters(&self) -> usize {
        self.completions.receiver_count()
    }

    /// Stats of the build that settles the current state.
    ///
    /// Returns the latest stats right away when no build is in flight,
    /// otherwise waits for the next `done` and returns that completion.
    /// Dropping the future releases the wait.
    pub async fn settled(&self) -> Option<Arc<BuildStats>> {
        // Subscribe before reading the phase so a `done` in between is not missed.
        let mut completions = self.completions.subscribe();
        {
            let state = self.state.lock();
            if matches!(state.phase, BuildPhase::Clean | BuildPhase::Dirty) {
                return state.latest.clone();
            }
        }
        self.wait(&mut completions).await
    }

    /// Wait for the next completed build, whatever the current phase.
    pub async fn next_completion(&self) -> Option<Arc<BuildStats>> {
        let mut completions = self.completions.subscribe();
        self.wait(&mut completions).await
    }

    async fn wait(
        &self,
        completions: &mut broadcast::Receiver<Arc<BuildStats>>,
    ) -> Option<Arc<BuildStats>> {
        match completions.recv().await {
            Ok(stats) => Some(stats),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Completion waiter lagged, using latest build");
                self.latest()
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn BuildListener>> {
        self.listeners.read().clone()
    }
}

impl Default for BuildStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Records every notification it receives.
    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        events: Mutex<Vec<String>>,
        log: Option<Arc<Mutex<Vec<&'static str>>>>,
    }

    impl Recorder {
        fn named(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                log: Some(log),
                ..Self::default()
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl BuildListener for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn on_invalid(&self, compiling_after_error: bool) -> Result<(), ListenerError> {
            if let Some(log) = &self.log {
                log.lock().push(self.name);
            }
            self.events
                .lock()
                .push(format!("invalid:{compiling_after_error}"));
            Ok(())
        }

        fn on_compile(&self, stats: &Arc<BuildStats>) -> Result<(), ListenerError> {
            if let Some(log) = &self.log {
                log.lock().push(self.name);
            }
            self.events.lock().push(format!("compile:{}", stats.hash));
            Ok(())
        }
    }

    struct Failing;

    impl BuildListener for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_invalid(&self, _: bool) -> Result<(), ListenerError> {
            Err(ListenerError::Other("boom".into()))
        }

        fn on_compile(&self, _: &Arc<BuildStats>) -> Result<(), ListenerError> {
            Err(ListenerError::Other("boom".into()))
        }
    }

    fn clean(hash: &str) -> BuildStats {
        BuildStats::new(hash)
    }

    fn warned(hash: &str) -> BuildStats {
        BuildStats::new(hash).with_warning("unused variable")
    }

    fn failed(hash: &str) -> BuildStats {
        BuildStats::new(hash).with_error("SyntaxError")
    }

    #[test]
    fn test_flag_follows_latest_done_only() {
        let tracker = BuildStateTracker::new();
        let sequence = [
            (failed("1"), true),
            (clean("2"), false),
            (warned("3"), true),
            (warned("4"), true),
            (clean("5"), false),
            (clean("6"), false),
        ];

        for (stats, expected) in sequence {
            tracker.on_done(stats);
            assert_eq!(tracker.had_issues(), expected);
        }
    }

    #[test]
    fn test_invalid_reports_flag_from_before_the_call() {
        let tracker = BuildStateTracker::new();
        let recorder = Arc::new(Recorder::default());
        tracker.add_listener(recorder.clone());

        tracker.on_invalidated();
        tracker.on_done(failed("a"));
        tracker.on_invalidated();
        tracker.on_done(clean("b"));
        tracker.on_invalidated();

        assert_eq!(
            recorder.events(),
            vec![
                "invalid:false",
                "compile:a",
                "invalid:true",
                "compile:b",
                "invalid:false",
            ]
        );
    }

    #[test]
    fn test_invalidation_does_not_reset_flag() {
        let tracker = BuildStateTracker::new();
        tracker.on_done(warned("a"));
        tracker.on_invalidated();
        assert!(tracker.had_issues());
        assert_eq!(tracker.status(), BuildStatus::Compiling);
    }

    #[test]
    fn test_consecutive_events_are_tolerated() {
        let tracker = BuildStateTracker::new();
        let recorder = Arc::new(Recorder::default());
        tracker.add_listener(recorder.clone());

        tracker.on_invalidated();
        tracker.on_invalidated();
        tracker.on_done(failed("a"));
        tracker.on_done(clean("b"));

        assert_eq!(tracker.phase(), BuildPhase::Clean);
        assert_eq!(tracker.status(), BuildStatus::Success);
        assert_eq!(tracker.generation(), 2);
        assert_eq!(
            recorder.events(),
            vec!["invalid:false", "invalid:false", "compile:a", "compile:b"]
        );
    }

    #[test]
    fn test_status_transitions() {
        let tracker = BuildStateTracker::new();
        assert_eq!(tracker.phase(), BuildPhase::Idle);
        assert_eq!(tracker.status(), BuildStatus::Compiling);

        tracker.on_done(warned("a"));
        assert_eq!(tracker.phase(), BuildPhase::Dirty);
        assert_eq!(tracker.status(), BuildStatus::SuccessWithWarnings);

        tracker.on_invalidated();
        assert_eq!(tracker.status(), BuildStatus::Compiling);

        tracker.on_done(failed("b"));
        assert_eq!(tracker.status(), BuildStatus::Failed);
    }

    #[test]
    fn test_listeners_run_in_order_and_survive_failures() {
        let tracker = BuildStateTracker::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(Recorder::named("first", log.clone()));
        let last = Arc::new(Recorder::named("last", log.clone()));

        tracker.add_listener(first.clone());
        tracker.add_listener(Arc::new(Failing));
        tracker.add_listener(last.clone());

        tracker.on_invalidated();
        tracker.on_done(clean("a"));

        assert_eq!(*log.lock(), vec!["first", "last", "first", "last"]);
        assert_eq!(last.events(), vec!["invalid:false", "compile:a"]);
    }

    #[test]
    fn test_latest_holds_last_stats() {
        let tracker = BuildStateTracker::new();
        tracker.on_done(clean("a").with_warning("w"));
        let latest = tracker.latest().unwrap();
        assert_eq!(latest.hash, "a");
        assert_eq!(latest.warnings, vec!["w"]);
    }

    #[tokio::test]
    async fn test_settled_returns_latest_when_idle_build_done() {
        let tracker = BuildStateTracker::new();
        tracker.on_done(clean("a"));
        let stats = tracker.settled().await.unwrap();
        assert_eq!(stats.hash, "a");
        assert_eq!(tracker.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn test_settled_waits_for_the_next_done() {
        let tracker = Arc::new(BuildStateTracker::new());
        tracker.on_done(clean("stale"));
        tracker.on_invalidated();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.settled().await })
        };
        let other = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.settled().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        assert_eq!(tracker.pending_waiters(), 2);

        tracker.on_done(clean("fresh"));

        assert_eq!(waiter.await.unwrap().unwrap().hash, "fresh");
        assert_eq!(other.await.unwrap().unwrap().hash, "fresh");
        assert_eq!(tracker.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_wait_is_released() {
        let tracker = Arc::new(BuildStateTracker::new());
        tracker.on_invalidated();

        let result = {
            let tracker = Arc::clone(&tracker);
            tokio::time::timeout(Duration::from_millis(10), async move {
                tracker.settled().await
            })
            .await
        };

        assert!(result.is_err());
        assert_eq!(tracker.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn test_run_applies_events_in_order() {
        let tracker = BuildStateTracker::new();
        let recorder = Arc::new(Recorder::default());
        tracker.add_listener(recorder.clone());

        let (tx, rx) = mpsc::channel(8);
        tx.send(CompilerEvent::Invalidated).await.unwrap();
        tx.send(CompilerEvent::Done(warned("a"))).await.unwrap();
        tx.send(CompilerEvent::Invalidated).await.unwrap();
        drop(tx);

        tracker.run(rx).await;

        assert_eq!(
            recorder.events(),
            vec!["invalid:false", "compile:a", "invalid:true"]
        );
        assert_eq!(tracker.status(), BuildStatus::Compiling);
    }
}
