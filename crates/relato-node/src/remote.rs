//! Remote incident service seam
//!
//! The sync coordinator talks to the municipal incident service through
//! this trait. The node binary currently ships without a live backend, so
//! [`NoRemoteService`] stands in and reports the service as unreachable;
//! pending records simply stay pending until a backend is configured.

use relato_core::{Incident, SyncError};

/// What the remote service said about one submitted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The service stored the record and assigned it an identifier.
    Accepted { remote_id: i64 },
    /// The service refused the record; resubmitting the same payload will
    /// not help.
    Rejected { reason: String },
}

/// The municipal incident service, as seen from a node.
#[allow(async_fn_in_trait)]
pub trait RemoteIncidentService: Send + Sync {
    /// Submit one locally authored incident.
    ///
    /// `Err(Unreachable)` means the service could not be contacted at all;
    /// the caller should stop draining and retry the whole batch later.
    async fn submit(&self, incident: &Incident) -> Result<SubmitOutcome, SyncError>;

    /// List the records this user has submitted, as the service sees them.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Incident>, SyncError>;
}

/// Placeholder backend for nodes with no service configured.
pub struct NoRemoteService;

impl RemoteIncidentService for NoRemoteService {
    async fn submit(&self, _incident: &Incident) -> Result<SubmitOutcome, SyncError> {
        Err(SyncError::Unreachable(
            "no remote service configured".to_string(),
        ))
    }

    async fn list_by_user(&self, _user_id: &str) -> Result<Vec<Incident>, SyncError> {
        Err(SyncError::Unreachable(
            "no remote service configured".to_string(),
        ))
    }
}

pub mod mock {
    //! Scriptable remote service for tests.

    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    use super::{RemoteIncidentService, SubmitOutcome};
    use relato_core::{Incident, SyncError};

    /// How the mock responds to each submission.
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Accept everything, assigning remote ids from a counter.
        Accept,
        /// Reject everything with the given reason.
        Reject(String),
        /// Fail every call as if the network were down.
        Unreachable,
    }

    /// In-memory remote service that records what was submitted to it.
    pub struct MockRemoteService {
        behavior: Mutex<MockBehavior>,
        next_remote_id: AtomicI64,
        submissions: Mutex<Vec<Incident>>,
    }

    impl MockRemoteService {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                next_remote_id: AtomicI64::new(1000),
                submissions: Mutex::new(Vec::new()),
            }
        }

        pub fn accepting() -> Self {
            Self::new(MockBehavior::Accept)
        }

        pub fn unreachable() -> Self {
            Self::new(MockBehavior::Unreachable)
        }

        /// Swap the scripted behavior mid-test, e.g. to bring the network
        /// back up.
        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        /// Every incident submitted so far, in submission order.
        pub fn submissions(&self) -> Vec<Incident> {
            self.submissions.lock().unwrap().clone()
        }

        pub fn submission_count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }
    }

    impl RemoteIncidentService for MockRemoteService {
        async fn submit(&self, incident: &Incident) -> Result<SubmitOutcome, SyncError> {
            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                MockBehavior::Accept => {
                    self.submissions.lock().unwrap().push(incident.clone());
                    let remote_id = self.next_remote_id.fetch_add(1, Ordering::SeqCst);
                    Ok(SubmitOutcome::Accepted { remote_id })
                }
                MockBehavior::Reject(reason) => {
                    self.submissions.lock().unwrap().push(incident.clone());
                    Ok(SubmitOutcome::Rejected { reason })
                }
                MockBehavior::Unreachable => {
                    Err(SyncError::Unreachable("mock network down".to_string()))
                }
            }
        }

        async fn list_by_user(&self, _user_id: &str) -> Result<Vec<Incident>, SyncError> {
            let behavior = self.behavior.lock().unwrap().clone();
            if matches!(behavior, MockBehavior::Unreachable) {
                return Err(SyncError::Unreachable("mock network down".to_string()));
            }
            Ok(self.submissions.lock().unwrap().clone())
        }
    }
}
