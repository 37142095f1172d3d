//! Drives [`RaceTimer`]s on the Tokio clock and keeps track of open race sessions.
//!
//! The timer itself never sleeps: each arm produces a plan which a per-session
//! schedule task replays with `sleep_until`, feeding events back through
//! [`RaceTimer::fire`]. Stale events are filtered by the epoch check, and the
//! schedule task of a superseded race is aborted as well.

use std::{
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use tokio::{
    sync::{Mutex, broadcast},
    task::AbortHandle,
    time::{Instant, sleep_until},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::state::race_timer::{
    ArmPlan, DelaySource, FireOutcome, RaceConfig, RaceResult, RaceSnapshot, RaceTimer,
    TriggerOutcome,
};

/// Observable change of a race session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceNotice {
    /// Session the change happened in.
    pub session_id: Uuid,
    /// Player bound to the session.
    pub player_id: String,
    /// Race epoch the change belongs to.
    pub epoch: u64,
    /// What happened.
    pub kind: RaceNoticeKind,
}

/// Kind of [`RaceNotice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceNoticeKind {
    /// A new light sequence started.
    Armed {
        /// Lights in the sequence.
        light_count: u8,
        /// Spacing between lights.
        light_interval_ms: u64,
    },
    /// One more light is on.
    LightOn {
        /// Lights currently illuminated.
        stage: u8,
    },
    /// Lights out.
    Live,
    /// A valid reaction was measured.
    Completed(RaceResult),
    /// False start.
    Faulted,
}

/// One player's race session.
pub struct RaceSession {
    id: Uuid,
    player_id: String,
    created_at: SystemTime,
    last_active: StdMutex<Instant>,
    timer: Arc<Mutex<RaceTimer>>,
    schedule: Mutex<Option<AbortHandle>>,
    notices: broadcast::Sender<RaceNotice>,
}

impl RaceSession {
    fn new(
        player_id: String,
        timer: RaceTimer,
        notices: broadcast::Sender<RaceNotice>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            player_id,
            created_at: SystemTime::now(),
            last_active: StdMutex::new(Instant::now()),
            timer: Arc::new(Mutex::new(timer)),
            schedule: Mutex::new(None),
            notices,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Player the session belongs to.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Creation instant.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Last time a client armed, triggered or looked at the session.
    pub fn last_active(&self) -> Instant {
        *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Start a new race, superseding whatever was running.
    pub async fn arm(&self) -> ArmPlan {
        self.touch();
        let mut timer = self.timer.lock().await;
        let plan = timer.arm(Instant::now());
        self.start_schedule(&timer, plan.clone()).await;
        plan
    }

    /// Deliver a trigger signal received now.
    pub async fn trigger(&self) -> TriggerOutcome {
        self.touch();
        let mut timer = self.timer.lock().await;
        let outcome = timer.trigger(Instant::now());
        match &outcome {
            TriggerOutcome::Started(plan) => {
                self.start_schedule(&timer, plan.clone()).await;
            }
            TriggerOutcome::Faulted => {
                self.cancel_schedule().await;
                self.publish(timer.epoch(), RaceNoticeKind::Faulted);
            }
            TriggerOutcome::Completed(result) => {
                self.publish(timer.epoch(), RaceNoticeKind::Completed(*result));
            }
            TriggerOutcome::Discarded | TriggerOutcome::Ignored => {
                debug!(session_id = %self.id, outcome = ?outcome, "trigger had no effect");
            }
        }
        outcome
    }

    /// Current observable state.
    pub async fn snapshot(&self) -> RaceSnapshot {
        self.touch();
        self.timer.lock().await.snapshot()
    }

    /// Number of lights of this session's start sequence.
    pub async fn light_count(&self) -> u8 {
        self.timer.lock().await.config().light_count()
    }

    /// Replace the schedule task. Called with the timer locked so two arms cannot interleave.
    async fn start_schedule(&self, timer: &RaceTimer, plan: ArmPlan) {
        self.publish(
            plan.epoch,
            RaceNoticeKind::Armed {
                light_count: timer.config().light_count(),
                light_interval_ms: timer.config().light_interval().as_millis() as u64,
            },
        );

        let task = tokio::spawn(run_schedule(
            self.timer.clone(),
            plan,
            NoticeContext {
                session_id: self.id,
                player_id: self.player_id.clone(),
                notices: self.notices.clone(),
            },
        ));

        if let Some(previous) = self.schedule.lock().await.replace(task.abort_handle()) {
            previous.abort();
        }
    }

    async fn cancel_schedule(&self) {
        if let Some(previous) = self.schedule.lock().await.take() {
            previous.abort();
        }
    }

    fn publish(&self, epoch: u64, kind: RaceNoticeKind) {
        let _ = self.notices.send(RaceNotice {
            session_id: self.id,
            player_id: self.player_id.clone(),
            epoch,
            kind,
        });
    }
}

impl Drop for RaceSession {
    fn drop(&mut self) {
        if let Some(handle) = self.schedule.get_mut().take() {
            handle.abort();
        }
    }
}

struct NoticeContext {
    session_id: Uuid,
    player_id: String,
    notices: broadcast::Sender<RaceNotice>,
}

async fn run_schedule(timer: Arc<Mutex<RaceTimer>>, plan: ArmPlan, context: NoticeContext) {
    for step in plan.steps {
        sleep_until(step.at).await;
        // Published under the timer lock so a concurrent arm or trigger cannot overtake it.
        let mut guard = timer.lock().await;
        let outcome = guard.fire(plan.epoch, step.event, Instant::now());

        let kind = match outcome {
            FireOutcome::LightOn { stage } => RaceNoticeKind::LightOn { stage },
            FireOutcome::Live { .. } => RaceNoticeKind::Live,
            FireOutcome::Stale => {
                debug!(
                    session_id = %context.session_id,
                    epoch = plan.epoch,
                    "schedule superseded"
                );
                return;
            }
        };

        let _ = context.notices.send(RaceNotice {
            session_id: context.session_id,
            player_id: context.player_id.clone(),
            epoch: plan.epoch,
            kind,
        });
        drop(guard);
    }
}

/// Open race sessions keyed by id.
pub struct RaceRegistry {
    sessions: DashMap<Uuid, Arc<RaceSession>>,
    config: RaceConfig,
    delays: Arc<dyn DelaySource>,
    notices: broadcast::Sender<RaceNotice>,
    idle_ttl: Duration,
}

impl RaceRegistry {
    /// Create an empty registry whose notice channel holds `capacity` events.
    ///
    /// Sessions untouched for `idle_ttl` are dropped by [`RaceRegistry::prune_idle`].
    pub fn new(
        config: RaceConfig,
        delays: Arc<dyn DelaySource>,
        capacity: usize,
        idle_ttl: Duration,
    ) -> Self {
        let (notices, _receiver) = broadcast::channel(capacity);
        Self {
            sessions: DashMap::new(),
            config,
            delays,
            notices,
            idle_ttl,
        }
    }

    /// Open an idle session for `player_id`, dropping abandoned ones first.
    pub fn create(&self, player_id: String) -> Arc<RaceSession> {
        self.prune_idle();
        let timer = RaceTimer::new(self.config.clone(), self.delays.clone());
        let session = Arc::new(RaceSession::new(player_id, timer, self.notices.clone()));
        self.sessions.insert(session.id(), session.clone());
        session
    }

    /// Look up a session.
    pub fn get(&self, id: &Uuid) -> Option<Arc<RaceSession>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Close a session; its pending schedule dies with the last handle.
    pub fn remove(&self, id: &Uuid) -> Option<Arc<RaceSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Close every session idle for longer than the configured TTL; returns how many went.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            now.saturating_duration_since(session.last_active()) < self.idle_ttl
        });
        let pruned = before.saturating_sub(self.sessions.len());
        if pruned > 0 {
            info!(pruned, "idle race sessions closed");
        }
        pruned
    }

    /// Idle time after which a session is closed.
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Receive every notice published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RaceNotice> {
        self.notices.subscribe()
    }

    /// Race configuration applied to new sessions.
    pub fn config(&self) -> &RaceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::state::{
        race_timer::{FixedDelay, RacePhase},
        scoring::ScoreTable,
    };

    const IDLE_TTL: Duration = Duration::from_secs(30 * 60);

    fn registry() -> RaceRegistry {
        RaceRegistry::new(
            RaceConfig::default(),
            Arc::new(FixedDelay(Duration::from_millis(500))),
            64,
            IDLE_TTL,
        )
    }

    fn drain(receiver: &mut broadcast::Receiver<RaceNotice>) -> Vec<RaceNoticeKind> {
        let mut kinds = Vec::new();
        while let Ok(notice) = receiver.try_recv() {
            kinds.push(notice.kind);
        }
        kinds
    }

    #[tokio::test(start_paused = true)]
    async fn lights_go_out_after_the_random_hold() {
        let registry = registry();
        let session = registry.create("driver@gmail.com".into());
        let start = Instant::now();
        session.arm().await;

        sleep(Duration::from_millis(5_499)).await;
        assert_eq!(session.snapshot().await.phase, RacePhase::Arming);
        assert_eq!(session.snapshot().await.light_stage, 5);

        sleep(Duration::from_millis(2)).await;
        let timer = session.timer.lock().await;
        assert_eq!(timer.phase(), RacePhase::Live);
        assert_eq!(timer.go_at(), Some(start + Duration::from_millis(5_500)));
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_after_lights_out_measures_reaction() {
        let registry = registry();
        let session = registry.create("driver@gmail.com".into());
        session.arm().await;

        sleep(Duration::from_millis(5_680)).await;
        let outcome = session.trigger().await;

        let TriggerOutcome::Completed(result) = outcome else {
            panic!("expected a completed race, got {outcome:?}");
        };
        assert_eq!(result.reaction_time_ms, 180);
        assert_eq!(session.snapshot().await.last_result, Some(result));
    }

    #[tokio::test(start_paused = true)]
    async fn early_trigger_faults_and_clears_the_result() {
        let registry = registry();
        let session = registry.create("driver@gmail.com".into());
        session.arm().await;

        sleep(Duration::from_millis(3_000)).await;
        assert_eq!(session.trigger().await, TriggerOutcome::Faulted);

        sleep(Duration::from_secs(10)).await;
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.phase, RacePhase::Faulted);
        assert_eq!(snapshot.last_result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn double_trigger_completes_once() {
        let registry = registry();
        let mut notices = registry.subscribe();
        let session = registry.create("driver@gmail.com".into());
        session.arm().await;

        sleep(Duration::from_millis(5_700)).await;
        let first = session.trigger().await;
        let second = session.trigger().await;

        assert!(matches!(first, TriggerOutcome::Completed(_)));
        assert_eq!(second, TriggerOutcome::Ignored);
        let completed = drain(&mut notices)
            .into_iter()
            .filter(|kind| matches!(kind, RaceNoticeKind::Completed(_)))
            .count();
        assert_eq!(completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_the_previous_go() {
        let registry = registry();
        let mut notices = registry.subscribe();
        let session = registry.create("driver@gmail.com".into());

        let first = session.arm().await;
        let second = session.arm().await;
        assert_eq!(second.epoch, first.epoch + 1);

        sleep(Duration::from_millis(5_600)).await;
        let lives: Vec<_> = std::iter::from_fn(|| notices.try_recv().ok())
            .filter(|notice| notice.kind == RaceNoticeKind::Live)
            .collect();
        assert_eq!(lives.len(), 1);
        assert_eq!(lives[0].epoch, second.epoch);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_after_completion_never_replays_old_go() {
        let registry = registry();
        let mut notices = registry.subscribe();
        let session = registry.create("driver@gmail.com".into());
        session.arm().await;
        sleep(Duration::from_millis(5_600)).await;
        session.trigger().await;
        drain(&mut notices);

        session.arm().await;
        sleep(Duration::from_millis(3_000)).await;
        assert_eq!(session.snapshot().await.phase, RacePhase::Arming);
        assert!(!drain(&mut notices).contains(&RaceNoticeKind::Live));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_trigger_arms_the_race() {
        let registry = registry();
        let session = registry.create("driver@gmail.com".into());

        assert!(matches!(session.trigger().await, TriggerOutcome::Started(_)));
        sleep(Duration::from_millis(5_500)).await;
        assert_eq!(session.snapshot().await.phase, RacePhase::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_session_stops_its_schedule() {
        let registry = registry();
        let mut notices = registry.subscribe();
        let session = registry.create("driver@gmail.com".into());
        let id = session.id();
        session.arm().await;
        drop(session);

        assert!(registry.remove(&id).is_some());
        assert!(registry.is_empty());
        drain(&mut notices);

        sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut notices).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_sessions_are_closed_after_the_idle_ttl() {
        let registry = registry();
        for _ in 0..1_000 {
            registry.create("driver@gmail.com".into()).arm().await;
        }
        assert_eq!(registry.len(), 1_000);

        sleep(Duration::from_secs(24 * 60 * 60)).await;
        let fresh = registry.create("rookie@gmail.com".into());

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&fresh.id()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn used_sessions_outlive_the_idle_ttl() {
        let registry = registry();
        let busy = registry.create("driver@gmail.com".into());
        let idle = registry.create("rookie@gmail.com".into());

        sleep(IDLE_TTL - Duration::from_secs(60)).await;
        busy.snapshot().await;
        sleep(Duration::from_secs(120)).await;

        assert_eq!(registry.prune_idle(), 1);
        assert!(registry.get(&busy.id()).is_some());
        assert!(registry.get(&idle.id()).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rearmed_races_never_publish_older_epochs_afterwards() {
        let config = RaceConfig::new(
            5,
            Duration::from_millis(1),
            Duration::ZERO,
            Duration::from_millis(5),
            ScoreTable::default(),
        )
        .unwrap();
        let registry = RaceRegistry::new(
            config,
            Arc::new(FixedDelay(Duration::from_millis(1))),
            4_096,
            IDLE_TTL,
        );
        let mut notices = registry.subscribe();
        let session = registry.create("driver@gmail.com".into());

        for round in 0..200u64 {
            session.arm().await;
            tokio::time::sleep(Duration::from_micros(500 + (round % 7) * 300)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut newest_armed = 0;
        while let Ok(notice) = notices.try_recv() {
            if matches!(notice.kind, RaceNoticeKind::Armed { .. }) {
                newest_armed = notice.epoch;
            } else {
                assert!(
                    notice.epoch >= newest_armed,
                    "epoch {} notice after armed epoch {newest_armed}",
                    notice.epoch
                );
            }
        }
        assert!(newest_armed > 0);
    }
}
