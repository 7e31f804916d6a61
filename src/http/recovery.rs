//! The session-recovery coordinator. A single-flight gate around the
//! captcha-login flow: at most one recovery runs at a time across all monitors; other callers
//! that hit expiry while a recovery is in flight wait (bounded ≈30s) for its outcome instead of
//! racing parallel logins. A latched "permanent failure" bit short-circuits all future
//! calls once the login flow reports rejected credentials.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::captcha::CaptchaSolver;
use crate::errors::EnrollmentError;
use crate::events::{CoreEvent, EventSink};
use crate::http::login;
use crate::http::session::HttpSession;
use crate::types::Credentials;

const MAX_RECOVERY_ATTEMPTS: u32 = 3;
const WAITER_TIMEOUT: Duration = Duration::from_secs(30);

struct Gate {
    /// `Some` while a recovery is in flight; waiters clone the `Notify` and await it.
    in_flight: Option<Arc<Notify>>,
    last_outcome: Option<bool>,
}

/// Single-flight wrapper around [`login::login`]. Generic over the captcha solver so the
/// coordinator can be built once per process and reused by every monitor.
pub struct RecoveryCoordinator<C: CaptchaSolver> {
    client: Client,
    base_url: String,
    credentials: Credentials,
    solver: C,
    session: Arc<HttpSession>,
    events: Arc<dyn EventSink>,
    permanent_failure: AtomicBool,
    gate: Mutex<Gate>,
}

impl<C: CaptchaSolver> RecoveryCoordinator<C> {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        credentials: Credentials,
        solver: C,
        session: Arc<HttpSession>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        RecoveryCoordinator {
            client,
            base_url: base_url.into(),
            credentials,
            solver,
            session,
            events,
            permanent_failure: AtomicBool::new(false),
            gate: Mutex::new(Gate {
                in_flight: None,
                last_outcome: None,
            }),
        }
    }

    /// Whether the permanent-failure latch is set. Once true, it never clears until the process
    /// is restarted with fresh credentials.
    pub fn is_permanently_failed(&self) -> bool {
        self.permanent_failure.load(Ordering::SeqCst)
    }

    /// Attempts to recover the session. Returns `true` if a valid session is now published,
    /// `false` otherwise (including when another caller's recovery failed, or the permanent
    /// latch was already set).
    pub async fn recover(&self) -> bool {
        if self.is_permanently_failed() {
            return false;
        }

        let join_existing = {
            let mut guard = self.gate.lock().unwrap();
            match &guard.in_flight {
                Some(notify) => Some(notify.clone()),
                None => {
                    guard.in_flight = Some(Arc::new(Notify::new()));
                    None
                }
            }
        };

        if let Some(notify) = join_existing {
            let _ = tokio::time::timeout(WAITER_TIMEOUT, notify.notified()).await;
            return self.gate.lock().unwrap().last_outcome.unwrap_or(false);
        }

        let outcome = self.run_recovery().await;

        let mut guard = self.gate.lock().unwrap();
        guard.last_outcome = Some(outcome);
        if let Some(notify) = guard.in_flight.take() {
            notify.notify_waiters();
        }
        drop(guard);

        outcome
    }

    async fn run_recovery(&self) -> bool {
        for attempt in 1..=MAX_RECOVERY_ATTEMPTS {
            let previous = self.session.snapshot();
            match login::login(
                &self.client,
                &self.base_url,
                &self.credentials,
                &self.solver,
                previous.server_time_offset_ms,
            )
            .await
            {
                Ok(mut new_session) => {
                    // `login` only learns the token, cookies, and student code; the campus/batch
                    // codes are config-supplied and constant across a re-login.
                    new_session.campus_code = previous.campus_code;
                    new_session.batch_code = previous.batch_code;
                    let token = new_session.token.clone();
                    self.session.set_session(new_session);
                    info!("Session recovered on attempt {attempt}/{MAX_RECOVERY_ATTEMPTS}.");
                    self.events.emit(CoreEvent::SessionUpdated { token });
                    self.events.emit(CoreEvent::LoginStatus {
                        online: true,
                        detail: "session recovered".into(),
                    });
                    return true;
                }
                Err(EnrollmentError::CredentialsRejected) => {
                    warn!("Login rejected with bad credentials; latching permanent failure.");
                    self.permanent_failure.store(true, Ordering::SeqCst);
                    self.events.emit(CoreEvent::NeedRelogin);
                    return false;
                }
                Err(e) => {
                    warn!("Recovery attempt {attempt}/{MAX_RECOVERY_ATTEMPTS} failed: {e}");
                }
            }
        }

        self.events.emit(CoreEvent::LoginStatus {
            online: false,
            detail: format!("recovery failed after {MAX_RECOVERY_ATTEMPTS} attempts"),
        });
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use crate::types::Session;

    struct AlwaysFailsSolver;

    impl CaptchaSolver for AlwaysFailsSolver {
        async fn solve(&self, _image_bytes: &[u8]) -> anyhow::Result<String> {
            anyhow::bail!("no network in tests")
        }
    }

    fn coordinator() -> RecoveryCoordinator<AlwaysFailsSolver> {
        let session = Arc::new(HttpSession::new(
            "http://example.invalid",
            Session::default(),
        ));
        let events: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());
        RecoveryCoordinator::new(
            Client::new(),
            "http://example.invalid",
            Credentials {
                student_id: "s".into(),
                password: "p".into(),
            },
            AlwaysFailsSolver,
            session,
            events,
        )
    }

    #[tokio::test]
    async fn permanent_latch_short_circuits_future_calls() {
        let coordinator = coordinator();
        coordinator.permanent_failure.store(true, Ordering::SeqCst);
        assert!(!coordinator.recover().await);
        assert!(coordinator.is_permanently_failed());
    }
}
