//! The scheduler: spawns one monitor per wishlist entry, watches for additions
//! every ≈500ms, probes the login state every ≈60s, and joins every monitor on shutdown with a
//! short timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::captcha::CaptchaSolver;
use crate::events::{CoreEvent, EventSink};
use crate::heartbeat::HeartbeatCounter;
use crate::http::recovery::RecoveryCoordinator;
use crate::http::EnrollmentApi;
use crate::monitor;
use crate::types::LoginProbeOutcome;
use crate::wishlist::Wishlist;

const SUPERVISOR_TICK: Duration = Duration::from_millis(500);
const LOGIN_PROBE_INTERVAL: Duration = Duration::from_secs(60);
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Scheduler<A: EnrollmentApi + 'static, C: CaptchaSolver + 'static> {
    api: Arc<A>,
    wishlist: Arc<Wishlist>,
    recovery: Arc<RecoveryCoordinator<C>>,
    events: Arc<dyn EventSink>,
    heartbeat: Arc<HeartbeatCounter>,
    stop: Arc<AtomicBool>,
}

impl<A: EnrollmentApi + 'static, C: CaptchaSolver + 'static> Scheduler<A, C> {
    pub fn new(
        api: Arc<A>,
        wishlist: Arc<Wishlist>,
        recovery: Arc<RecoveryCoordinator<C>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Scheduler {
            api,
            wishlist,
            recovery,
            events,
            heartbeat: Arc::new(HeartbeatCounter::new()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone of the shared stop flag, for the embedding process to call `store(true, ...)` on
    /// in response to a shutdown request (e.g. ctrl-c).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn heartbeat(&self) -> Arc<HeartbeatCounter> {
        self.heartbeat.clone()
    }

    /// Spawns a monitor per existing wishlist entry, then runs the supervisor loop until the
    /// wishlist empties out or `stop()` is called.
    pub async fn run(&self) {
        let mut handles: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut last_probe = tokio::time::Instant::now();

        for entry in self.wishlist.snapshot() {
            self.spawn_monitor(&mut handles, entry.teaching_class_id().to_owned());
        }

        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!("Scheduler stopping: shutdown requested.");
                break;
            }

            // Reap finished monitors so a re-added id (after removal) can be spawned again.
            handles.retain(|_, handle| !handle.is_finished());

            let snapshot = self.wishlist.snapshot();
            if snapshot.is_empty() && handles.is_empty() {
                info!("Scheduler stopping: wishlist is empty and no monitors remain.");
                break;
            }

            for entry in &snapshot {
                let id = entry.teaching_class_id().to_owned();
                if !handles.contains_key(&id) {
                    self.spawn_monitor(&mut handles, id);
                }
            }

            if last_probe.elapsed() >= LOGIN_PROBE_INTERVAL {
                last_probe = tokio::time::Instant::now();
                self.probe_login().await;
            }

            tokio::time::sleep(SUPERVISOR_TICK).await;
        }

        self.join_all(handles).await;
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn spawn_monitor(&self, handles: &mut HashMap<String, JoinHandle<()>>, teaching_class_id: String) {
        let Some(entry) = self
            .wishlist
            .snapshot()
            .into_iter()
            .find(|e| e.teaching_class_id() == teaching_class_id)
        else {
            return;
        };

        let id = entry.record.id.clone();
        let api = self.api.clone();
        let wishlist = self.wishlist.clone();
        let recovery = self.recovery.clone();
        let events = self.events.clone();
        let heartbeat = self.heartbeat.clone();
        let stop = self.stop.clone();

        let handle = tokio::spawn(async move {
            monitor::run_monitor(id, api, wishlist, recovery, events, heartbeat, stop).await;
        });

        handles.insert(teaching_class_id, handle);
    }

    async fn probe_login(&self) {
        match self.api.probe_login().await {
            LoginProbeOutcome::Online => {
                self.events.emit(CoreEvent::LoginStatus {
                    online: true,
                    detail: "login probe ok".into(),
                });
            }
            LoginProbeOutcome::Expired => {
                warn!("Periodic login probe found the session expired; recovering.");
                let recovered = self.recovery.recover().await;
                self.events.emit(CoreEvent::LoginStatus {
                    online: recovered,
                    detail: if recovered {
                        "session recovered after periodic probe".into()
                    } else {
                        "periodic probe recovery failed".into()
                    },
                });
            }
            LoginProbeOutcome::NetworkError => {
                warn!("Periodic login probe failed due to a network error.");
            }
        }
    }

    async fn join_all(&self, handles: HashMap<String, JoinHandle<()>>) {
        let waits = handles.into_iter().map(|(id, handle)| async move {
            if tokio::time::timeout(JOIN_TIMEOUT, handle).await.is_err() {
                warn!("Monitor for {id} did not finish within the shutdown join timeout; abandoning it.");
            }
        });
        join_all(waits).await;
    }
}
