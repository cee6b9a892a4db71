use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::{
    PersistedSession, SESSION_NAME_PREFIX, Session, SessionId, SessionStatus,
    session_id_from_name,
};
use crate::error::PersistError;
use crate::infrastructure::event_log::{Event, EventLogger};
use crate::infrastructure::persistence::{SessionStore, StoreLoad};
use crate::infrastructure::tmux::Multiplexer;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveryReport {
    pub retained: Vec<SessionId>,
    pub recovered: Vec<SessionId>,
    pub synthesized: Vec<SessionId>,
    pub dropped: Vec<String>,
}

impl DiscoveryReport {
    pub fn live_count(&self) -> usize {
        self.retained.len() + self.recovered.len() + self.synthesized.len()
    }
}

struct PersistGate {
    issued: AtomicU64,
    written: tokio::sync::Mutex<u64>,
}

/// Authoritative table of known sessions. Every mutation schedules a background write of
/// the whole table; write failures are logged and never reach the caller.
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<SessionId, Session>>,
    store: Arc<dyn SessionStore>,
    logger: Arc<dyn EventLogger>,
    gate: Arc<PersistGate>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, logger: Arc<dyn EventLogger>) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            store,
            logger,
            gate: Arc::new(PersistGate {
                issued: AtomicU64::new(0),
                written: tokio::sync::Mutex::new(0),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<SessionId, Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<SessionId, Session>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.read().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.read().contains_key(session_id)
    }

    pub fn list(&self) -> Vec<Session> {
        self.read().values().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn upsert(&self, session: Session) {
        self.write().insert(session.id.clone(), session);
        self.schedule_persist();
    }

    pub fn remove(&self, session_id: &SessionId) -> Option<Session> {
        let removed = self.write().remove(session_id);
        if removed.is_some() {
            self.schedule_persist();
        }
        removed
    }

    pub fn set_status(&self, session_id: &SessionId, status: SessionStatus) -> bool {
        let updated = {
            let mut sessions = self.write();
            match sessions.get_mut(session_id) {
                Some(session) => {
                    session.status = status;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.schedule_persist();
        }
        updated
    }

    fn persisted_rows(&self) -> Vec<PersistedSession> {
        self.read().values().map(Session::to_persisted).collect()
    }

    fn schedule_persist(&self) {
        let generation = self.gate.issued.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let rows = self.persisted_rows();
        let store = Arc::clone(&self.store);
        let logger = Arc::clone(&self.logger);
        let gate = Arc::clone(&self.gate);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.logger.log(
                Event::new("registry", "persist_skipped").with_data("reason", "no async runtime"),
            );
            return;
        };

        runtime.spawn(async move {
            if let Err(error) = write_generation(&gate, store.as_ref(), generation, &rows).await {
                logger.log(
                    Event::new("registry", "persist_failed").with_data("error", error.to_string()),
                );
            }
        });
    }

    /// Writes the current table and waits for the write, superseding any queued writes.
    pub async fn flush(&self) -> Result<(), PersistError> {
        let generation = self.gate.issued.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let rows = self.persisted_rows();
        write_generation(&self.gate, self.store.as_ref(), generation, &rows).await
    }

    /// Reconciles the table with the live managed sessions. Metadata comes from the
    /// in-memory entry when there is one, then from the persisted store; anything else is
    /// synthesized from its multiplexer name. Persisted rows with no live session are dropped.
    /// Sessions inserted or removed while discovery was awaiting the multiplexer keep their
    /// newer state.
    pub async fn discover(
        &self,
        multiplexer: &dyn Multiplexer,
        fallback_dir: &Path,
    ) -> DiscoveryReport {
        let live_names = multiplexer.list_managed_sessions(SESSION_NAME_PREFIX).await;

        let persisted = match self.store.load().await {
            StoreLoad::Corrupt(message) => {
                self.logger
                    .log(Event::new("registry", "store_corrupt").with_data("error", message));
                Vec::new()
            }
            load => load.into_sessions(),
        };
        let mut persisted_by_name: HashMap<String, PersistedSession> = persisted
            .into_iter()
            .map(|row| (row.session_name.clone(), row))
            .collect();

        let known = self.read().clone();
        let mut report = DiscoveryReport::default();
        let mut reconciled = BTreeMap::new();

        for session_name in live_names {
            let Some(session_id) = session_id_from_name(&session_name) else {
                continue;
            };
            let pane = multiplexer.resolve_pane_handle(&session_name).await;
            let persisted_row = persisted_by_name.remove(&session_name);

            let session = if let Some(existing) = known.get(&session_id) {
                report.retained.push(session_id.clone());
                Session {
                    pane,
                    ..existing.clone()
                }
            } else if let Some(row) = persisted_row {
                report.recovered.push(session_id.clone());
                Session::from_persisted(session_id.clone(), pane, &row)
            } else {
                report.synthesized.push(session_id.clone());
                Session::synthesized(session_id.clone(), pane, fallback_dir.to_path_buf())
            };
            reconciled.insert(session_id, session);
        }

        let mut dropped: BTreeSet<String> = persisted_by_name.into_keys().collect();
        for (session_id, session) in &known {
            if !reconciled.contains_key(session_id) {
                dropped.insert(session.session_name.clone());
            }
        }
        report.dropped = dropped.into_iter().collect();

        {
            let mut sessions = self.write();
            reconciled.retain(|session_id, _| {
                !known.contains_key(session_id) || sessions.contains_key(session_id)
            });
            for (session_id, session) in sessions.iter() {
                if !known.contains_key(session_id) {
                    reconciled
                        .entry(session_id.clone())
                        .or_insert_with(|| session.clone());
                }
            }
            *sessions = reconciled;
        }
        self.schedule_persist();

        self.logger.log(
            Event::new("registry", "discovery_completed")
                .with_data("retained", report.retained.len())
                .with_data("recovered", report.recovered.len())
                .with_data("synthesized", report.synthesized.len())
                .with_data("dropped", report.dropped.len()),
        );
        report
    }
}

async fn write_generation(
    gate: &PersistGate,
    store: &dyn SessionStore,
    generation: u64,
    rows: &[PersistedSession],
) -> Result<(), PersistError> {
    let mut written = gate.written.lock().await;
    if *written >= generation {
        return Ok(());
    }
    store.save(rows).await?;
    *written = generation;
    Ok(())
}
