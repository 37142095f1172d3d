pub mod race;
pub mod race_timer;
pub mod scoring;
mod sse;
pub mod stats;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::score_store::ScoreStore,
    error::ServiceError,
    services::submission_gate::SubmissionGate,
    state::{
        race::RaceRegistry,
        race_timer::{DelaySource, RandomDelay},
    },
};

pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;

const PUBLIC_SSE_CAPACITY: usize = 64;
const RACE_NOTICE_CAPACITY: usize = 256;

/// Central application state: active score store, race sessions and broadcast hubs.
pub struct AppState {
    config: AppConfig,
    score_store: RwLock<Option<Arc<dyn ScoreStore>>>,
    public_sse: SseHub,
    races: RaceRegistry,
    submissions: SubmissionGate,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a score store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_delays(config, Arc::new(RandomDelay))
    }

    /// Same as [`AppState::new`] with an explicit source for the hold before lights out.
    pub fn with_delays(config: AppConfig, delays: Arc<dyn DelaySource>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            races: RaceRegistry::new(
                config.race().clone(),
                delays,
                RACE_NOTICE_CAPACITY,
                config.session_idle_ttl(),
            ),
            submissions: SubmissionGate::new(config.dedupe_window()),
            score_store: RwLock::new(None),
            public_sse: SseHub::new(PUBLIC_SSE_CAPACITY),
            degraded: degraded_tx,
            config,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current score store, if one is installed.
    pub async fn score_store(&self) -> Option<Arc<dyn ScoreStore>> {
        self.score_store.read().await.as_ref().cloned()
    }

    /// Current score store or [`ServiceError::Degraded`].
    pub async fn require_score_store(&self) -> Result<Arc<dyn ScoreStore>, ServiceError> {
        self.score_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new score store implementation and leave degraded mode.
    pub async fn set_score_store(&self, store: Arc<dyn ScoreStore>) {
        self.score_store.write().await.replace(store);
        self.update_degraded(false);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update the degraded flag, notifying watchers only when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        &self.public_sse
    }

    /// Open race sessions.
    pub fn races(&self) -> &RaceRegistry {
        &self.races
    }

    /// Dedupe gate in front of score persistence.
    pub fn submissions(&self) -> &SubmissionGate {
        &self.submissions
    }
}
