mod admission;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's reservation store plus directory state. All coordination
/// between connections happens here: the per-resource `RwLock` write guard
/// is the admission serialization point, the WAL writer task is the
/// durability point.
pub struct Engine {
    /// Per-resource slots keyed by resource id.
    pub state: DashMap<Ulid, SharedResourceState>,
    users: DashMap<Ulid, User>,
    /// Lowercased email → user id. Reserved before the WAL append so racing
    /// registrations lose cleanly.
    email_index: DashMap<String, Ulid>,
    categories: DashMap<Ulid, Category>,
    /// Reverse lookup: entity (reservation/field) id → resource id.
    entity_index: DashMap<Ulid, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a resource-scoped event to a ResourceState (no locking — caller
/// holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, entity_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ResourceUpdated {
            name,
            description,
            category_id,
            is_active,
            ..
        } => {
            rs.name = name.clone();
            rs.description = description.clone();
            rs.category_id = *category_id;
            rs.is_active = *is_active;
        }
        Event::FieldAdded {
            id,
            resource_id,
            key,
            value,
        } => {
            rs.fields.push(CustomField {
                id: *id,
                key: key.clone(),
                value: value.clone(),
            });
            entity_index.insert(*id, *resource_id);
        }
        Event::FieldRemoved { id, .. } => {
            rs.fields.retain(|f| f.id != *id);
            entity_index.remove(id);
        }
        Event::ReservationBooked {
            id,
            resource_id,
            user_id,
            span,
        } => {
            rs.insert_reservation(Reservation {
                id: *id,
                user_id: *user_id,
                span: *span,
                status: ReservationStatus::Active,
                cancelled_at: None,
            });
            entity_index.insert(*id, *resource_id);
        }
        Event::ReservationCancelled {
            id, cancelled_at, ..
        } => {
            if let Some(r) = rs.reservations.iter_mut().find(|r| r.id == *id) {
                r.status = ReservationStatus::Cancelled;
                r.cancelled_at = Some(*cancelled_at);
            }
        }
        Event::ReservationPurged { id, .. } => {
            rs.remove_reservation(*id);
            entity_index.remove(id);
        }
        // Directory and resource-lifecycle events are handled at the map level.
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            users: DashMap::new(),
            email_index: DashMap::new(),
            categories: DashMap::new(),
            entity_index: DashMap::new(),
            wal_tx,
        };

        // Replay events — we're the sole owner of the slot Arcs here, so
        // try_write always succeeds instantly (no contention). Never use
        // blocking_write because this may run inside an async context
        // (lazy tenant creation).
        for event in &events {
            match event {
                Event::ResourceCreated {
                    id,
                    name,
                    description,
                    category_id,
                    is_active,
                } => {
                    let rs = ResourceState::new(
                        *id,
                        name.clone(),
                        description.clone(),
                        *category_id,
                        *is_active,
                    );
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::ResourceDeleted { id } => {
                    if let Some((_, slot)) = engine.state.remove(id) {
                        let guard = slot.try_read().expect("replay: uncontended read");
                        for r in &guard.reservations {
                            engine.entity_index.remove(&r.id);
                        }
                        for f in &guard.fields {
                            engine.entity_index.remove(&f.id);
                        }
                    }
                }
                other => {
                    if let Some(resource_id) = event_resource_id(other) {
                        if let Some(entry) = engine.state.get(&resource_id) {
                            let slot = entry.value().clone();
                            drop(entry);
                            let mut guard =
                                slot.try_write().expect("replay: uncontended write");
                            apply_to_resource(&mut guard, other, &engine.entity_index);
                        }
                    } else {
                        engine.apply_directory(other);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Apply a directory (user/category) event to the in-memory maps.
    /// Shared between replay and the live mutation paths.
    pub(super) fn apply_directory(&self, event: &Event) {
        match event {
            Event::UserRegistered {
                id,
                email,
                password_hash,
                role,
            } => {
                self.email_index.insert(email.to_lowercase(), *id);
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        email: email.clone(),
                        password_hash: password_hash.clone(),
                        role: *role,
                    },
                );
            }
            Event::UserUpdated {
                id,
                email,
                password_hash,
            } => {
                let Some(existing) = self.users.get(id).map(|u| u.clone()) else {
                    return;
                };
                let old_lc = existing.email.to_lowercase();
                let new_lc = email.to_lowercase();
                if old_lc != new_lc {
                    self.email_index.remove(&old_lc);
                }
                self.email_index.insert(new_lc, *id);
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        email: email.clone(),
                        password_hash: password_hash.clone(),
                        role: existing.role,
                    },
                );
            }
            Event::UserDeleted { id } => {
                if let Some((_, user)) = self.users.remove(id) {
                    self.email_index.remove(&user.email.to_lowercase());
                }
            }
            Event::CategoryCreated { id, name } | Event::CategoryUpdated { id, name } => {
                self.categories.insert(
                    *id,
                    Category {
                        id: *id,
                        name: name.clone(),
                    },
                );
            }
            Event::CategoryDeleted { id } => {
                self.categories.remove(id);
            }
            _ => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource_state(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_index.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call, with the resource write lock held
    /// across both. This is what makes an admission decision atomic.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.entity_index);
        Ok(())
    }

    /// Lookup entity → resource, get resource, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .get_resource_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_resource_state(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }

    /// Snapshot the slot Arcs so callers can await each lock without holding
    /// a DashMap shard lock across an await point.
    pub(super) fn slots(&self) -> Vec<SharedResourceState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }
}

/// Extract the resource_id from a resource-scoped event.
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::FieldAdded { resource_id, .. }
        | Event::FieldRemoved { resource_id, .. }
        | Event::ReservationBooked { resource_id, .. }
        | Event::ReservationCancelled { resource_id, .. }
        | Event::ReservationPurged { resource_id, .. } => Some(*resource_id),
        Event::ResourceUpdated { id, .. } => Some(*id),
        _ => None,
    }
}
