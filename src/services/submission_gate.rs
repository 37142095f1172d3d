//! Exactly-once effect for finalized race results.
//!
//! A result is identified by a key derived from its content, so the same race
//! reaching the gate twice (double click, retried request, replayed socket
//! message) runs the persistence work only once inside the dedupe window.

use std::{
    collections::HashMap,
    future::Future,
    time::{Duration, SystemTime},
};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;
use uuid::Uuid;

/// Namespace of the derived submission keys.
const SUBMISSION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b7e_93a4_4d0b_8e5f_1a2c_3d4e_5f60);

/// Default time a key stays remembered.
pub const DEFAULT_DEDUPE_WINDOW: Duration = Duration::from_millis(2_000);

/// A finalized race result on its way to persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedResult {
    /// Owner of the result.
    pub player_id: String,
    /// Measured reaction.
    pub reaction_time_ms: u64,
    /// Points awarded.
    pub score: u32,
    /// Wall-clock instant the race completed.
    pub finalized_at: SystemTime,
}

/// Idempotency key of a [`FinalizedResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionKey(Uuid);

impl SubmissionKey {
    /// Derive the key from the result content.
    pub fn derive(result: &FinalizedResult) -> Self {
        let finalized_at = OffsetDateTime::from(result.finalized_at)
            .format(&Rfc3339)
            .unwrap_or_else(|_| {
                result
                    .finalized_at
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_nanos().to_string())
                    .unwrap_or_default()
            });
        let name = format!(
            "{}|{}|{}|{}",
            result.player_id, result.reaction_time_ms, result.score, finalized_at
        );
        Self(Uuid::new_v5(&SUBMISSION_NAMESPACE, name.as_bytes()))
    }

    /// Key as a UUID, reused as the stored record id.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

/// Result of passing through the gate.
#[derive(Debug, PartialEq, Eq)]
pub enum GateOutcome<T> {
    /// The work ran and produced `T`.
    Submitted(T),
    /// The key was seen inside the window; nothing ran.
    Duplicate,
}

/// Time-windowed set of recently submitted keys.
pub struct SubmissionGate {
    window: Duration,
    seen: Mutex<HashMap<SubmissionKey, Instant>>,
}

impl SubmissionGate {
    /// Gate remembering keys for `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Configured dedupe window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run `work` unless `key` went through within the window.
    ///
    /// A failed `work` forgets the key so a retry is not swallowed as a duplicate.
    pub async fn submit<F, Fut, T, E>(&self, key: SubmissionKey, work: F) -> Result<GateOutcome<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let now = Instant::now();
            let mut seen = self.seen.lock().await;
            seen.retain(|_, at| now.saturating_duration_since(*at) < self.window);
            if seen.contains_key(&key) {
                debug!(key = %key.0, "duplicate submission dropped");
                return Ok(GateOutcome::Duplicate);
            }
            seen.insert(key, now);
        }

        match work().await {
            Ok(value) => Ok(GateOutcome::Submitted(value)),
            Err(err) => {
                self.seen.lock().await.remove(&key);
                Err(err)
            }
        }
    }

    /// Keys currently remembered, expired ones included until the next submit.
    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

impl Default for SubmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUPE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use tokio::time::sleep;

    use super::*;

    fn result() -> FinalizedResult {
        FinalizedResult {
            player_id: "driver@gmail.com".into(),
            reaction_time_ms: 180,
            score: 1_000,
            finalized_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_760_000_000),
        }
    }

    #[test]
    fn key_depends_on_every_field() {
        let base = SubmissionKey::derive(&result());
        assert_eq!(base, SubmissionKey::derive(&result()));

        let mut other = result();
        other.reaction_time_ms = 181;
        assert_ne!(base, SubmissionKey::derive(&other));

        let mut other = result();
        other.player_id = "someone@gmail.com".into();
        assert_ne!(base, SubmissionKey::derive(&other));

        let mut other = result();
        other.finalized_at += Duration::from_millis(1);
        assert_ne!(base, SubmissionKey::derive(&other));
    }

    #[tokio::test(start_paused = true)]
    async fn same_result_twice_runs_work_once() {
        let gate = SubmissionGate::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let key = SubmissionKey::derive(&result());

        for _ in 0..2 {
            let runs = runs.clone();
            let _ = gate
                .submit(key, || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                })
                .await;
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_is_reported() {
        let gate = SubmissionGate::default();
        let key = SubmissionKey::derive(&result());

        let first = gate.submit(key, || async { Ok::<_, ()>(7) }).await;
        let second = gate.submit(key, || async { Ok::<_, ()>(8) }).await;

        assert_eq!(first, Ok(GateOutcome::Submitted(7)));
        assert_eq!(second, Ok(GateOutcome::Duplicate));
    }

    #[tokio::test(start_paused = true)]
    async fn key_expires_after_window() {
        let gate = SubmissionGate::new(Duration::from_millis(2_000));
        let key = SubmissionKey::derive(&result());

        gate.submit(key, || async { Ok::<_, ()>(()) }).await.unwrap();
        sleep(Duration::from_millis(2_000)).await;

        let again = gate.submit(key, || async { Ok::<_, ()>(()) }).await;
        assert_eq!(again, Ok(GateOutcome::Submitted(())));
        assert_eq!(gate.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_work_can_be_retried() {
        let gate = SubmissionGate::default();
        let key = SubmissionKey::derive(&result());

        let failed = gate.submit(key, || async { Err::<(), _>("offline") }).await;
        assert_eq!(failed, Err("offline"));

        let retried = gate.submit(key, || async { Ok::<_, &str>(()) }).await;
        assert_eq!(retried, Ok(GateOutcome::Submitted(())));
    }
}
