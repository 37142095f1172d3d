//! Race-start timing state machine.
//!
//! ```text
//!            arm()/trigger()            go event             trigger()
//!  Idle ──────────────────► Arming ──────────────► Live ───────────────► Completed
//!                             │  ▲                                          │
//!                   trigger() │  │ arm()                                    │
//!                             ▼  │                                          │
//!                           Faulted ◄───────────── arm() ───────────────────┘
//! ```
//!
//! The timer is a plain value: it never sleeps and never reads the clock. Callers pass
//! `now` into every entry point and execute the [`ArmPlan`] returned by [`RaceTimer::arm`]
//! themselves. Every arm bumps the race epoch; scheduled events carry the epoch they were
//! planned for and are rejected once a newer race exists.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;

use crate::state::scoring::ScoreTable;

/// Observable phase of a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    /// Nothing armed yet in this session.
    Idle,
    /// Lights are coming on; any trigger now is a false start.
    Arming,
    /// All lights went out; the reaction window is open.
    Live,
    /// A valid reaction was measured.
    Completed,
    /// The player jumped the start.
    Faulted,
}

/// Reasons a race configuration is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaceConfigError {
    /// A start sequence needs at least one light.
    #[error("light count must be at least 1")]
    NoLights,
    /// Lights must be spaced by a non-zero interval.
    #[error("light interval must be strictly positive")]
    ZeroInterval,
    /// The random delay bounds are inverted.
    #[error("minimum random delay ({min:?}) exceeds maximum ({max:?})")]
    InvertedDelay {
        /// Configured lower bound.
        min: Duration,
        /// Configured upper bound.
        max: Duration,
    },
}

/// Timing parameters of the start sequence plus the score table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceConfig {
    light_count: u8,
    light_interval: Duration,
    min_random_delay: Duration,
    max_random_delay: Duration,
    score_table: ScoreTable,
}

impl RaceConfig {
    /// Build a validated configuration.
    pub fn new(
        light_count: u8,
        light_interval: Duration,
        min_random_delay: Duration,
        max_random_delay: Duration,
        score_table: ScoreTable,
    ) -> Result<Self, RaceConfigError> {
        if light_count == 0 {
            return Err(RaceConfigError::NoLights);
        }
        if light_interval.is_zero() {
            return Err(RaceConfigError::ZeroInterval);
        }
        if min_random_delay > max_random_delay {
            return Err(RaceConfigError::InvertedDelay {
                min: min_random_delay,
                max: max_random_delay,
            });
        }

        Ok(Self {
            light_count,
            light_interval,
            min_random_delay,
            max_random_delay,
            score_table,
        })
    }

    /// Number of lights in the countdown.
    pub fn light_count(&self) -> u8 {
        self.light_count
    }

    /// Spacing between two consecutive lights.
    pub fn light_interval(&self) -> Duration {
        self.light_interval
    }

    /// Lower bound of the random hold after the last light.
    pub fn min_random_delay(&self) -> Duration {
        self.min_random_delay
    }

    /// Upper bound of the random hold after the last light.
    pub fn max_random_delay(&self) -> Duration {
        self.max_random_delay
    }

    /// Table converting reaction times to points.
    pub fn score_table(&self) -> &ScoreTable {
        &self.score_table
    }
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            light_count: 5,
            light_interval: Duration::from_millis(1_000),
            min_random_delay: Duration::from_millis(200),
            max_random_delay: Duration::from_millis(2_000),
            score_table: ScoreTable::default(),
        }
    }
}

/// Source of the hold between the last light and the go event.
pub trait DelaySource: Send + Sync {
    /// Pick a delay inside `[min, max]`.
    fn next_delay(&self, min: Duration, max: Duration) -> Duration;
}

/// Uniformly random hold, drawn with millisecond granularity.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomDelay;

impl DelaySource for RandomDelay {
    fn next_delay(&self, min: Duration, max: Duration) -> Duration {
        let min_ms = min.as_millis() as u64;
        let max_ms = max.as_millis() as u64;
        if min_ms >= max_ms {
            return min;
        }
        Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
    }
}

/// Always the same hold (clamped to the configured bounds).
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl DelaySource for FixedDelay {
    fn next_delay(&self, min: Duration, max: Duration) -> Duration {
        self.0.clamp(min, max)
    }
}

/// Event the caller must deliver back through [`RaceTimer::fire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledEvent {
    /// Light `k` (1-based) switches on.
    LightOn(u8),
    /// Every light switches off at once.
    Go,
}

/// A scheduled event and the instant it is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledStep {
    /// Deadline of the event.
    pub at: Instant,
    /// Event to deliver.
    pub event: ScheduledEvent,
}

/// Schedule produced by arming a race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmPlan {
    /// Epoch of the race this plan belongs to.
    pub epoch: u64,
    /// Instant the light sequence started.
    pub armed_at: Instant,
    /// Random hold drawn for this race.
    pub random_delay: Duration,
    /// Light events followed by the go event, in deadline order.
    pub steps: Vec<ScheduledStep>,
}

/// A measured reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceResult {
    /// Latency between the go event and the trigger.
    pub reaction_time_ms: u64,
    /// Points awarded by the score table.
    pub score: u32,
}

/// Effect of delivering a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// One more light is on.
    LightOn {
        /// Lights currently illuminated.
        stage: u8,
    },
    /// The reaction window opened.
    Live {
        /// Instant the lights went out.
        go_at: Instant,
    },
    /// The event belongs to an older race or no longer applies; nothing changed.
    Stale,
}

/// Effect of a trigger signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The session was idle, so the trigger armed a new race.
    Started(ArmPlan),
    /// The trigger came before the go event.
    Faulted,
    /// A valid reaction was measured.
    Completed(RaceResult),
    /// The trigger carried a timestamp before the go event; dropped without effect.
    Discarded,
    /// The race is already resolved; only a new arm restarts it.
    Ignored,
}

/// Read-only view used by presenters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceSnapshot {
    /// Current phase.
    pub phase: RacePhase,
    /// Lights currently illuminated.
    pub light_stage: u8,
    /// Most recent measured reaction, if any.
    pub last_result: Option<RaceResult>,
    /// Current race epoch.
    pub epoch: u64,
}

/// Single-owner race-start state machine.
pub struct RaceTimer {
    config: RaceConfig,
    delays: Arc<dyn DelaySource>,
    phase: RacePhase,
    epoch: u64,
    armed_at: Option<Instant>,
    go_at: Option<Instant>,
    trigger_at: Option<Instant>,
    light_stage: u8,
    last_result: Option<RaceResult>,
}

impl RaceTimer {
    /// Create an idle timer.
    pub fn new(config: RaceConfig, delays: Arc<dyn DelaySource>) -> Self {
        Self {
            config,
            delays,
            phase: RacePhase::Idle,
            epoch: 0,
            armed_at: None,
            go_at: None,
            trigger_at: None,
            light_stage: 0,
            last_result: None,
        }
    }

    /// Start (or restart) a race at `now`.
    ///
    /// Any previously planned events become stale because the epoch moves forward.
    /// `last_result` is kept so the previous outcome stays visible while the lights run.
    pub fn arm(&mut self, now: Instant) -> ArmPlan {
        self.epoch += 1;
        self.phase = RacePhase::Arming;
        self.armed_at = Some(now);
        self.go_at = None;
        self.trigger_at = None;
        self.light_stage = 0;

        let random_delay = self
            .delays
            .next_delay(self.config.min_random_delay, self.config.max_random_delay)
            .clamp(self.config.min_random_delay, self.config.max_random_delay);

        let interval = self.config.light_interval;
        let mut steps = (1..=self.config.light_count)
            .map(|k| ScheduledStep {
                at: now + interval * u32::from(k),
                event: ScheduledEvent::LightOn(k),
            })
            .collect::<Vec<_>>();
        steps.push(ScheduledStep {
            at: now + interval * u32::from(self.config.light_count) + random_delay,
            event: ScheduledEvent::Go,
        });

        ArmPlan {
            epoch: self.epoch,
            armed_at: now,
            random_delay,
            steps,
        }
    }

    /// Deliver a scheduled event planned for `epoch`.
    pub fn fire(&mut self, epoch: u64, event: ScheduledEvent, now: Instant) -> FireOutcome {
        if epoch != self.epoch || self.phase != RacePhase::Arming {
            return FireOutcome::Stale;
        }

        match event {
            ScheduledEvent::LightOn(k) => {
                if k <= self.light_stage || k > self.config.light_count {
                    return FireOutcome::Stale;
                }
                self.light_stage = k;
                FireOutcome::LightOn { stage: k }
            }
            ScheduledEvent::Go => {
                if self.light_stage != self.config.light_count {
                    return FireOutcome::Stale;
                }
                self.light_stage = 0;
                self.go_at = Some(now);
                self.phase = RacePhase::Live;
                FireOutcome::Live { go_at: now }
            }
        }
    }

    /// Deliver a trigger signal received at `now`.
    pub fn trigger(&mut self, now: Instant) -> TriggerOutcome {
        match self.phase {
            RacePhase::Idle => TriggerOutcome::Started(self.arm(now)),
            RacePhase::Arming => {
                // Moving the epoch strands every pending light and go event.
                self.epoch += 1;
                self.light_stage = 0;
                self.last_result = None;
                self.phase = RacePhase::Faulted;
                TriggerOutcome::Faulted
            }
            RacePhase::Live => {
                let Some(go_at) = self.go_at else {
                    return TriggerOutcome::Discarded;
                };
                let Some(elapsed) = now.checked_duration_since(go_at) else {
                    return TriggerOutcome::Discarded;
                };

                let reaction_time_ms = elapsed.as_millis() as u64;
                let result = RaceResult {
                    reaction_time_ms,
                    score: self.config.score_table.score_of(reaction_time_ms),
                };
                self.trigger_at = Some(now);
                self.last_result = Some(result);
                self.phase = RacePhase::Completed;
                TriggerOutcome::Completed(result)
            }
            RacePhase::Completed | RacePhase::Faulted => TriggerOutcome::Ignored,
        }
    }

    /// Current observable state.
    pub fn snapshot(&self) -> RaceSnapshot {
        RaceSnapshot {
            phase: self.phase,
            light_stage: self.light_stage,
            last_result: self.last_result,
            epoch: self.epoch,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Instant the current race was armed.
    pub fn armed_at(&self) -> Option<Instant> {
        self.armed_at
    }

    /// Instant the lights went out in the current race.
    pub fn go_at(&self) -> Option<Instant> {
        self.go_at
    }

    /// Instant the valid trigger of the current race was received.
    pub fn trigger_at(&self) -> Option<Instant> {
        self.trigger_at
    }

    /// Active configuration.
    pub fn config(&self) -> &RaceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn timer_with_delay(delay_ms: u64) -> RaceTimer {
        RaceTimer::new(RaceConfig::default(), Arc::new(FixedDelay(ms(delay_ms))))
    }

    /// Deliver every step of `plan` due at or before `until`.
    fn run_until(timer: &mut RaceTimer, plan: &ArmPlan, until: Instant) -> Vec<FireOutcome> {
        plan.steps
            .iter()
            .filter(|step| step.at <= until)
            .map(|step| timer.fire(plan.epoch, step.event, step.at))
            .collect()
    }

    #[test]
    fn new_timer_is_idle() {
        let timer = timer_with_delay(500);
        let snapshot = timer.snapshot();
        assert_eq!(snapshot.phase, RacePhase::Idle);
        assert_eq!(snapshot.light_stage, 0);
        assert_eq!(snapshot.last_result, None);
    }

    #[test]
    fn arm_schedules_lights_then_go() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let plan = timer.arm(t0);

        assert_eq!(plan.steps.len(), 6);
        for (index, step) in plan.steps.iter().take(5).enumerate() {
            let k = index as u64 + 1;
            assert_eq!(step.at, t0 + ms(k * 1_000));
            assert_eq!(step.event, ScheduledEvent::LightOn(k as u8));
        }
        let go = plan.steps.last().unwrap();
        assert_eq!(go.event, ScheduledEvent::Go);
        assert_eq!(go.at, t0 + ms(5_500));
        assert_eq!(timer.phase(), RacePhase::Arming);
    }

    #[test]
    fn fixed_delay_is_clamped_into_bounds() {
        let mut timer = timer_with_delay(10_000);
        let plan = timer.arm(Instant::now());
        assert_eq!(plan.random_delay, ms(2_000));

        let mut timer = timer_with_delay(0);
        let plan = timer.arm(Instant::now());
        assert_eq!(plan.random_delay, ms(200));
    }

    #[test]
    fn random_delay_stays_in_window() {
        let source = RandomDelay;
        for _ in 0..200 {
            let delay = source.next_delay(ms(200), ms(2_000));
            assert!(delay >= ms(200) && delay <= ms(2_000));
        }
    }

    #[test]
    fn light_stage_increases_then_resets_on_go() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let plan = timer.arm(t0);

        let mut previous = 0;
        for step in plan.steps.iter().take(5) {
            timer.fire(plan.epoch, step.event, step.at);
            let stage = timer.snapshot().light_stage;
            assert!(stage > previous);
            previous = stage;
        }
        assert_eq!(previous, 5);

        let go = plan.steps[5];
        assert_eq!(
            timer.fire(plan.epoch, go.event, go.at),
            FireOutcome::Live { go_at: go.at }
        );
        assert_eq!(timer.snapshot().light_stage, 0);
        assert_eq!(timer.phase(), RacePhase::Live);
    }

    #[test]
    fn reference_scenario_measures_exact_reaction() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let plan = timer.arm(t0);
        run_until(&mut timer, &plan, t0 + ms(5_500));

        assert_eq!(timer.go_at(), Some(t0 + ms(5_500)));

        let outcome = timer.trigger(t0 + ms(5_680));
        assert_eq!(
            outcome,
            TriggerOutcome::Completed(RaceResult {
                reaction_time_ms: 180,
                score: 900,
            })
        );
        assert_eq!(timer.phase(), RacePhase::Completed);
        assert_eq!(timer.trigger_at(), Some(t0 + ms(5_680)));
        assert_eq!(
            timer.trigger_at().unwrap() - timer.go_at().unwrap(),
            ms(180)
        );
    }

    #[test]
    fn trigger_during_arming_faults_and_clears_result() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();

        // A first completed race leaves a result behind.
        let plan = timer.arm(t0);
        run_until(&mut timer, &plan, t0 + ms(5_500));
        timer.trigger(t0 + ms(5_700));
        assert!(timer.snapshot().last_result.is_some());

        let t1 = t0 + ms(10_000);
        let plan = timer.arm(t1);
        run_until(&mut timer, &plan, t1 + ms(3_000));
        assert_eq!(timer.snapshot().light_stage, 3);

        assert_eq!(timer.trigger(t1 + ms(3_000)), TriggerOutcome::Faulted);
        let snapshot = timer.snapshot();
        assert_eq!(snapshot.phase, RacePhase::Faulted);
        assert_eq!(snapshot.last_result, None);
        assert_eq!(snapshot.light_stage, 0);
    }

    #[test]
    fn pending_events_are_stale_after_fault() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let plan = timer.arm(t0);
        run_until(&mut timer, &plan, t0 + ms(2_000));
        timer.trigger(t0 + ms(2_500));

        for step in &plan.steps[2..] {
            assert_eq!(
                timer.fire(plan.epoch, step.event, step.at),
                FireOutcome::Stale
            );
        }
        assert_eq!(timer.phase(), RacePhase::Faulted);
        assert_eq!(timer.go_at(), None);
    }

    #[test]
    fn rearm_invalidates_previous_schedule() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let first = timer.arm(t0);
        let second = timer.arm(t0);
        assert!(second.epoch > first.epoch);

        for step in &first.steps {
            assert_eq!(
                timer.fire(first.epoch, step.event, step.at),
                FireOutcome::Stale
            );
        }
        assert_eq!(timer.snapshot().light_stage, 0);
        assert_eq!(timer.go_at(), None);

        run_until(&mut timer, &second, t0 + ms(5_500));
        assert_eq!(timer.phase(), RacePhase::Live);
    }

    #[test]
    fn rearm_from_completed_keeps_last_result_visible() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let plan = timer.arm(t0);
        run_until(&mut timer, &plan, t0 + ms(5_500));
        timer.trigger(t0 + ms(5_750));
        let result = timer.snapshot().last_result;

        let t1 = t0 + ms(8_000);
        timer.arm(t1);
        let snapshot = timer.snapshot();
        assert_eq!(snapshot.phase, RacePhase::Arming);
        assert_eq!(snapshot.last_result, result);
        assert_eq!(timer.go_at(), None);
        assert_eq!(timer.trigger_at(), None);
        assert_eq!(timer.armed_at(), Some(t1));
    }

    #[test]
    fn second_trigger_in_same_race_is_ignored() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let plan = timer.arm(t0);
        run_until(&mut timer, &plan, t0 + ms(5_500));

        assert!(matches!(
            timer.trigger(t0 + ms(5_650)),
            TriggerOutcome::Completed(_)
        ));
        assert_eq!(timer.trigger(t0 + ms(5_651)), TriggerOutcome::Ignored);
        assert_eq!(
            timer.snapshot().last_result.map(|r| r.reaction_time_ms),
            Some(150)
        );
    }

    #[test]
    fn trigger_after_fault_is_ignored() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        timer.arm(t0);
        assert_eq!(timer.trigger(t0 + ms(100)), TriggerOutcome::Faulted);
        assert_eq!(timer.trigger(t0 + ms(200)), TriggerOutcome::Ignored);
        assert_eq!(timer.phase(), RacePhase::Faulted);
    }

    #[test]
    fn trigger_in_idle_arms_a_race() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let outcome = timer.trigger(t0);
        match outcome {
            TriggerOutcome::Started(plan) => {
                assert_eq!(plan.epoch, 1);
                assert_eq!(plan.armed_at, t0);
            }
            other => panic!("expected race start, got {other:?}"),
        }
        assert_eq!(timer.phase(), RacePhase::Arming);
    }

    #[test]
    fn trigger_stamped_before_go_is_discarded() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let plan = timer.arm(t0);
        run_until(&mut timer, &plan, t0 + ms(5_500));

        assert_eq!(timer.trigger(t0 + ms(5_400)), TriggerOutcome::Discarded);
        assert_eq!(timer.phase(), RacePhase::Live);
        assert_eq!(timer.snapshot().last_result, None);
    }

    #[test]
    fn go_is_refused_before_every_light_is_on() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let plan = timer.arm(t0);
        run_until(&mut timer, &plan, t0 + ms(4_000));

        assert_eq!(
            timer.fire(plan.epoch, ScheduledEvent::Go, t0 + ms(4_100)),
            FireOutcome::Stale
        );
        assert_eq!(timer.phase(), RacePhase::Arming);
    }

    #[test]
    fn duplicate_light_event_does_not_move_stage_backwards() {
        let mut timer = timer_with_delay(500);
        let t0 = Instant::now();
        let plan = timer.arm(t0);
        run_until(&mut timer, &plan, t0 + ms(3_000));

        assert_eq!(
            timer.fire(plan.epoch, ScheduledEvent::LightOn(2), t0 + ms(3_100)),
            FireOutcome::Stale
        );
        assert_eq!(timer.snapshot().light_stage, 3);
    }

    #[test]
    fn config_validation() {
        let table = ScoreTable::default();
        assert_eq!(
            RaceConfig::new(0, ms(1_000), ms(200), ms(2_000), table.clone()),
            Err(RaceConfigError::NoLights)
        );
        assert_eq!(
            RaceConfig::new(5, ms(0), ms(200), ms(2_000), table.clone()),
            Err(RaceConfigError::ZeroInterval)
        );
        assert!(matches!(
            RaceConfig::new(5, ms(1_000), ms(3_000), ms(2_000), table.clone()),
            Err(RaceConfigError::InvertedDelay { .. })
        ));
        assert!(RaceConfig::new(3, ms(500), ms(100), ms(100), table).is_ok());
    }
}
