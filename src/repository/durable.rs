use std::io;
use std::path::PathBuf;
use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::locks::{KeyedGuard, KeyedLocks};
use crate::model::*;
use crate::wal::Wal;

use super::memory::InMemoryStore;
use super::{RepoError, Repository, now_ms};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Always flush so a failed batch doesn't leak buffered bytes into the next one.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Repository backed by an in-memory store and a write-ahead log. Every
/// mutation is logged first and applied second, so a failed append leaves
/// memory untouched.
pub struct DurableStore {
    memory: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Per-record write locks keep log order equal to apply order.
    record_locks: KeyedLocks,
    /// Writers share it; compaction takes it exclusively so the snapshot
    /// matches the log it replaces.
    compaction_gate: RwLock<()>,
}

impl DurableStore {
    /// Replay the log at `wal_path` and start the writer task. Must run inside
    /// a Tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let memory = InMemoryStore::new();
        for event in &events {
            memory.apply_event(event);
        }
        info!(
            "replayed {} events from {}: {} users, {} appointments",
            events.len(),
            wal_path.display(),
            memory.user_count(),
            memory.appointment_count()
        );

        Ok(Self {
            memory,
            wal_tx,
            record_locks: KeyedLocks::new(),
            compaction_gate: RwLock::new(()),
        })
    }

    pub fn memory(&self) -> &InMemoryStore {
        &self.memory
    }

    async fn wal_append(&self, event: &Event) -> Result<(), RepoError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| RepoError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| RepoError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| RepoError::Wal(e.to_string()))
    }

    /// Log, then apply.
    async fn persist(&self, event: &Event) -> Result<(), RepoError> {
        self.wal_append(event).await?;
        self.memory.apply_event(event);
        Ok(())
    }

    async fn lock_record(&self, id: Ulid) -> KeyedGuard<'_> {
        self.record_locks.lock(id).await
    }

    /// Rewrite the log with only the events needed to recreate current state.
    pub async fn compact(&self) -> Result<(), RepoError> {
        let _exclusive = self.compaction_gate.write().await;
        let events = self.memory.snapshot_events();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| RepoError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| RepoError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| RepoError::Wal(e.to_string()))?;
        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Repository for DurableStore {
    async fn find_user(&self, id: Ulid, role: Option<Role>) -> Result<Option<User>, RepoError> {
        self.memory.find_user(id, role).await
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, RepoError> {
        let _shared = self.compaction_gate.read().await;
        let user = InMemoryStore::prepare_user(user);
        self.memory.reserve_identity(&user)?;
        if let Err(e) = self.persist(&Event::registered(&user)).await {
            self.memory.release_identity(&user);
            warn!("rolled back registration of {}: {e}", user.email);
            return Err(e);
        }
        Ok(user)
    }

    async fn find_appointments_by_provider(
        &self,
        provider_id: Ulid,
    ) -> Result<Vec<Appointment>, RepoError> {
        self.memory.find_appointments_by_provider(provider_id).await
    }

    async fn insert_appointment(&self, draft: AppointmentDraft) -> Result<Appointment, RepoError> {
        let _shared = self.compaction_gate.read().await;
        let appt = InMemoryStore::prepare_appointment(draft);
        if let Err(e) = self.persist(&Event::created(&appt)).await {
            warn!("rolled back appointment {}: {e}", appt.id);
            return Err(e);
        }
        Ok(appt)
    }

    async fn find_appointment(&self, id: Ulid) -> Result<Option<Appointment>, RepoError> {
        self.memory.find_appointment(id).await
    }

    async fn find_appointments_by_client(
        &self,
        client_id: Ulid,
        page: Page,
    ) -> Result<Vec<Appointment>, RepoError> {
        self.memory.find_appointments_by_client(client_id, page).await
    }

    async fn find_appointments_by_provider_for_user(
        &self,
        provider_id: Ulid,
        page: Page,
    ) -> Result<Vec<Appointment>, RepoError> {
        self.memory
            .find_appointments_by_provider_for_user(provider_id, page)
            .await
    }

    async fn update_appointment(&self, mut appt: Appointment) -> Result<Appointment, RepoError> {
        let _shared = self.compaction_gate.read().await;
        let _record = self.lock_record(appt.id).await;
        if self.memory.get_appointment(&appt.id).is_none() {
            return Err(RepoError::Missing(appt.id));
        }
        appt.updated_at = Some(now_ms());
        self.persist(&Event::updated(&appt)).await?;
        Ok(appt)
    }

    async fn delete_appointment(&self, appt: &Appointment) -> Result<(), RepoError> {
        let _shared = self.compaction_gate.read().await;
        let _record = self.lock_record(appt.id).await;
        if self.memory.get_appointment(&appt.id).is_none() {
            return Err(RepoError::Missing(appt.id));
        }
        self.persist(&Event::AppointmentDeleted { id: appt.id }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("appointd_test_durable");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn draft(client_id: Ulid, provider_id: Ulid) -> AppointmentDraft {
        AppointmentDraft {
            title: "Haircut".into(),
            description: Some("short".into()),
            date_time: 3_600_000,
            duration_minutes: 45,
            status: AppointmentStatus::Pending,
            client_id,
            provider_id,
        }
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = test_wal_path("reopen.wal");
        let (client, appt) = {
            let store = DurableStore::open(path.clone()).unwrap();
            let client = store
                .insert_user(NewUser {
                    id: None,
                    email: "c@example.com".into(),
                    role: Role::Client,
                })
                .await
                .unwrap();
            let mut appt = store
                .insert_appointment(draft(client.id, Ulid::new()))
                .await
                .unwrap();
            appt.title = "Beard trim".into();
            let appt = store.update_appointment(appt).await.unwrap();
            (client, appt)
        };

        let reopened = DurableStore::open(path).unwrap();
        assert_eq!(reopened.find_user(client.id, None).await.unwrap(), Some(client));
        assert_eq!(reopened.find_appointment(appt.id).await.unwrap(), Some(appt));
    }

    #[tokio::test]
    async fn deleted_appointment_stays_deleted_after_reopen() {
        let path = test_wal_path("delete_reopen.wal");
        let (client_id, appt) = {
            let store = DurableStore::open(path.clone()).unwrap();
            let client_id = Ulid::new();
            let appt = store
                .insert_appointment(draft(client_id, Ulid::new()))
                .await
                .unwrap();
            store.delete_appointment(&appt).await.unwrap();
            (client_id, appt)
        };

        let reopened = DurableStore::open(path).unwrap();
        assert!(reopened.find_appointment(appt.id).await.unwrap().is_none());
        assert!(reopened
            .find_appointments_by_client(client_id, Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn duplicate_email_not_logged() {
        let path = test_wal_path("dup_email.wal");
        let store = DurableStore::open(path.clone()).unwrap();
        let new = || NewUser {
            id: None,
            email: "dup@example.com".into(),
            role: Role::Client,
        };
        store.insert_user(new()).await.unwrap();
        assert!(matches!(store.insert_user(new()).await, Err(RepoError::EmailTaken(_))));
        assert_eq!(store.appends_since_compact().await, 1);
    }

    #[tokio::test]
    async fn taken_id_is_refused_and_not_logged() {
        let path = test_wal_path("taken_id.wal");
        let store = DurableStore::open(path.clone()).unwrap();
        let provider = store
            .insert_user(NewUser {
                id: None,
                email: "dr@example.com".into(),
                role: Role::Provider,
            })
            .await
            .unwrap();

        let again = store
            .insert_user(NewUser {
                id: Some(provider.id),
                email: "other@example.com".into(),
                role: Role::Client,
            })
            .await;
        assert!(matches!(again, Err(RepoError::UserExists(id)) if id == provider.id));
        assert_eq!(store.appends_since_compact().await, 1);
        assert_eq!(store.find_user(provider.id, None).await.unwrap(), Some(provider));

        // The refused email stays free
        store
            .insert_user(NewUser {
                id: None,
                email: "other@example.com".into(),
                role: Role::Client,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn record_locks_are_released_after_writes() {
        let path = test_wal_path("record_locks.wal");
        let store = DurableStore::open(path).unwrap();
        let mut appt = store
            .insert_appointment(draft(Ulid::new(), Ulid::new()))
            .await
            .unwrap();
        appt.status = AppointmentStatus::Confirmed;
        let appt = store.update_appointment(appt).await.unwrap();
        assert!(store.record_locks.is_empty());
        store.delete_appointment(&appt).await.unwrap();
        assert!(store.record_locks.is_empty());
    }

    #[tokio::test]
    async fn compaction_shrinks_log_and_preserves_state() {
        let path = test_wal_path("compact.wal");
        let store = DurableStore::open(path.clone()).unwrap();
        let client_id = Ulid::new();
        let provider_id = Ulid::new();

        let mut kept = None;
        for i in 0..10 {
            let appt = store
                .insert_appointment(draft(client_id, provider_id))
                .await
                .unwrap();
            if i == 9 {
                kept = Some(appt);
            } else {
                store.delete_appointment(&appt).await.unwrap();
            }
        }
        assert_eq!(store.appends_since_compact().await, 19);
        let before = std::fs::metadata(&path).unwrap().len();

        store.compact().await.unwrap();
        assert_eq!(store.appends_since_compact().await, 0);
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        let kept = kept.unwrap();
        drop(store);
        let reopened = DurableStore::open(path).unwrap();
        assert_eq!(reopened.find_appointment(kept.id).await.unwrap(), Some(kept));
        assert_eq!(reopened.memory().appointment_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_are_all_durable() {
        let path = test_wal_path("concurrent.wal");
        let store = Arc::new(DurableStore::open(path.clone()).unwrap());
        let provider_id = Ulid::new();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_appointment(draft(Ulid::new(), provider_id))
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        drop(store);

        let reopened = DurableStore::open(path).unwrap();
        assert_eq!(
            reopened.find_appointments_by_provider(provider_id).await.unwrap().len(),
            50
        );
    }
}
