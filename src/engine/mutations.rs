use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::auth;
use crate::limits::*;
use crate::model::*;

use super::admission::{check_no_overlap, now_ms, validate_interval};
use super::{Engine, EngineError, WalCommand};

fn validate_email(email: &str) -> Result<(), EngineError> {
    if email.is_empty() || email.len() > MAX_EMAIL_LEN || !email.contains('@') {
        return Err(EngineError::InvalidRequest("malformed email"));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), EngineError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(EngineError::InvalidRequest("password too short"));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(EngineError::LimitExceeded("password too long"));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidRequest("empty name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    // ── Users ────────────────────────────────────────────────

    /// Self-service registration. Always creates a `user`-role account.
    pub async fn register_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserInfo, EngineError> {
        self.register_with_role(email, password, Role::User).await
    }

    pub(crate) async fn register_with_role(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<UserInfo, EngineError> {
        validate_email(email)?;
        validate_password(password)?;
        if self.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let id = Ulid::new();
        let email_lc = email.to_lowercase();
        // Reserve the email before the WAL await so a racing register loses cleanly.
        match self.email_index.entry(email_lc.clone()) {
            Entry::Occupied(_) => return Err(EngineError::EmailTaken(email.to_string())),
            Entry::Vacant(v) => {
                v.insert(id);
            }
        }

        let event = Event::UserRegistered {
            id,
            email: email.to_string(),
            password_hash: auth::hash_password(password),
            role,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.email_index.remove(&email_lc);
            return Err(e);
        }
        self.apply_directory(&event);
        Ok(UserInfo {
            id,
            email: email.to_string(),
            role,
        })
    }

    /// Idempotently create the seeded admin account for a fresh tenant.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<(), EngineError> {
        if self.email_index.contains_key(&email.to_lowercase()) {
            return Ok(());
        }
        match self.register_with_role(email, password, Role::Admin).await {
            Ok(_) => Ok(()),
            // Lost a race to a concurrent seed of the same tenant.
            Err(EngineError::EmailTaken(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Update email and/or password. Users may update themselves; admins
    /// may update anyone.
    pub async fn update_user(
        &self,
        caller: &Caller,
        id: Ulid,
        patch: UserPatch,
    ) -> Result<UserInfo, EngineError> {
        if !caller.can_access(id) {
            return Err(EngineError::Forbidden("cannot modify another user"));
        }
        let existing = self
            .users
            .get(&id)
            .map(|u| u.clone())
            .ok_or(EngineError::NotFound(id))?;

        let email = match &patch.email {
            Some(e) => {
                validate_email(e)?;
                e.clone()
            }
            None => existing.email.clone(),
        };
        let password_hash = match &patch.password {
            Some(p) => {
                validate_password(p)?;
                auth::hash_password(p)
            }
            None => existing.password_hash.clone(),
        };

        let old_lc = existing.email.to_lowercase();
        let new_lc = email.to_lowercase();
        let mut reserved = false;
        if new_lc != old_lc {
            match self.email_index.entry(new_lc.clone()) {
                Entry::Occupied(_) => return Err(EngineError::EmailTaken(email)),
                Entry::Vacant(v) => {
                    v.insert(id);
                    reserved = true;
                }
            }
        }

        let event = Event::UserUpdated {
            id,
            email: email.clone(),
            password_hash,
        };
        if let Err(e) = self.wal_append(&event).await {
            if reserved {
                self.email_index.remove(&new_lc);
            }
            return Err(e);
        }
        self.apply_directory(&event);
        Ok(UserInfo {
            id,
            email,
            role: existing.role,
        })
    }

    pub async fn delete_user(&self, caller: &Caller, id: Ulid) -> Result<(), EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        // A user holding active reservations cannot be deleted; cancel first.
        for slot in self.slots() {
            let guard = slot.read().await;
            if guard
                .reservations
                .iter()
                .any(|r| r.user_id == id && r.is_active())
            {
                return Err(EngineError::HasReservations(id));
            }
        }

        let event = Event::UserDeleted { id };
        self.wal_append(&event).await?;
        self.apply_directory(&event);
        Ok(())
    }

    // ── Categories ───────────────────────────────────────────

    pub async fn create_category(
        &self,
        caller: &Caller,
        id: Ulid,
        name: &str,
    ) -> Result<CategoryInfo, EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        validate_name(name)?;
        if self.categories.len() >= MAX_CATEGORIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many categories"));
        }
        if self.categories.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.categories.iter().any(|c| c.name == name) {
            return Err(EngineError::NameTaken(name.to_string()));
        }

        let event = Event::CategoryCreated {
            id,
            name: name.to_string(),
        };
        self.wal_append(&event).await?;
        self.apply_directory(&event);
        Ok(CategoryInfo {
            id,
            name: name.to_string(),
        })
    }

    pub async fn update_category(
        &self,
        caller: &Caller,
        id: Ulid,
        name: &str,
    ) -> Result<CategoryInfo, EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        validate_name(name)?;
        if !self.categories.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if self.categories.iter().any(|c| c.name == name && c.id != id) {
            return Err(EngineError::NameTaken(name.to_string()));
        }

        let event = Event::CategoryUpdated {
            id,
            name: name.to_string(),
        };
        self.wal_append(&event).await?;
        self.apply_directory(&event);
        Ok(CategoryInfo {
            id,
            name: name.to_string(),
        })
    }

    pub async fn delete_category(&self, caller: &Caller, id: Ulid) -> Result<(), EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        if !self.categories.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        for slot in self.slots() {
            let guard = slot.read().await;
            if guard.category_id == Some(id) {
                return Err(EngineError::CategoryInUse(id));
            }
        }

        let event = Event::CategoryDeleted { id };
        self.wal_append(&event).await?;
        self.apply_directory(&event);
        Ok(())
    }

    // ── Resources ────────────────────────────────────────────

    pub async fn create_resource(
        &self,
        caller: &Caller,
        id: Ulid,
        name: &str,
        description: Option<String>,
        category_id: Option<Ulid>,
    ) -> Result<ResourceInfo, EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        validate_name(name)?;
        if let Some(ref d) = description
            && d.len() > MAX_DESCRIPTION_LEN
        {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        if self.state.len() >= MAX_RESOURCES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(cid) = category_id
            && !self.categories.contains_key(&cid)
        {
            return Err(EngineError::NotFound(cid));
        }

        let event = Event::ResourceCreated {
            id,
            name: name.to_string(),
            description: description.clone(),
            category_id,
            is_active: true,
        };
        self.wal_append(&event).await?;
        let rs = ResourceState::new(id, name.to_string(), description.clone(), category_id, true);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        Ok(ResourceInfo {
            id,
            name: name.to_string(),
            description,
            category_id,
            is_active: true,
        })
    }

    /// Apply a partial update. Absent fields are left untouched; explicit
    /// NULL clears a nullable field.
    pub async fn update_resource(
        &self,
        caller: &Caller,
        id: Ulid,
        patch: ResourcePatch,
    ) -> Result<ResourceInfo, EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        if let Some(ref n) = patch.name {
            validate_name(n)?;
        }
        if let Some(Some(ref d)) = patch.description
            && d.len() > MAX_DESCRIPTION_LEN
        {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        if let Some(Some(cid)) = patch.category_id
            && !self.categories.contains_key(&cid)
        {
            return Err(EngineError::NotFound(cid));
        }

        let rs = self
            .get_resource_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::ResourceUpdated {
            id,
            name: patch.name.unwrap_or_else(|| guard.name.clone()),
            description: patch
                .description
                .unwrap_or_else(|| guard.description.clone()),
            category_id: patch.category_id.unwrap_or(guard.category_id),
            is_active: patch.is_active.unwrap_or(guard.is_active),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(ResourceInfo {
            id,
            name: guard.name.clone(),
            description: guard.description.clone(),
            category_id: guard.category_id,
            is_active: guard.is_active,
        })
    }

    pub async fn delete_resource(&self, caller: &Caller, id: Ulid) -> Result<(), EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        let rs = self
            .get_resource_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        // Hold the write guard through removal so no admission slips in
        // between the check and the delete.
        let guard = rs.write().await;
        if guard.has_active_reservations() {
            return Err(EngineError::HasReservations(id));
        }

        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        for r in &guard.reservations {
            self.entity_index.remove(&r.id);
        }
        for f in &guard.fields {
            self.entity_index.remove(&f.id);
        }
        Ok(())
    }

    // ── Custom fields ────────────────────────────────────────

    pub async fn add_field(
        &self,
        caller: &Caller,
        id: Ulid,
        resource_id: Ulid,
        key: &str,
        value: &str,
    ) -> Result<FieldInfo, EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        if key.is_empty() {
            return Err(EngineError::InvalidRequest("empty field key"));
        }
        if key.len() > MAX_FIELD_KEY_LEN || value.len() > MAX_FIELD_VALUE_LEN {
            return Err(EngineError::LimitExceeded("field key/value too long"));
        }
        if self.entity_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_resource_state(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.fields.len() >= MAX_FIELDS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many fields on resource"));
        }

        let event = Event::FieldAdded {
            id,
            resource_id,
            key: key.to_string(),
            value: value.to_string(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(FieldInfo {
            id,
            resource_id,
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub async fn remove_field(&self, caller: &Caller, id: Ulid) -> Result<Ulid, EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        // The entity index also tracks reservations; make sure this id is a field.
        if !guard.fields.iter().any(|f| f.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::FieldRemoved { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(resource_id)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Admission. The precondition order is part of the contract: missing
    /// resource, inactive resource, invalid interval, overlap. The write
    /// guard taken here is held across the overlap scan, the WAL append and
    /// the insert, so at most one of two racing overlapping requests can
    /// succeed; the loser observes the winner's row and gets `Conflict`.
    pub async fn book(
        &self,
        caller: &Caller,
        id: Ulid,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<ReservationInfo, EngineError> {
        let rs = self
            .get_resource_state(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if !guard.is_active {
            return Err(EngineError::ResourceInactive(resource_id));
        }
        let span = validate_interval(start, end)?;
        if self.entity_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        check_no_overlap(&guard, &span)?;

        let event = Event::ReservationBooked {
            id,
            resource_id,
            user_id: caller.id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(ReservationInfo {
            id,
            resource_id,
            user_id: caller.id,
            start,
            end,
            status: ReservationStatus::Active,
        })
    }

    /// Cancellation frees the slot immediately; the row stays visible (as
    /// `cancelled`) until the retention reaper purges it.
    pub async fn cancel_reservation(
        &self,
        caller: &Caller,
        id: Ulid,
    ) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let (owner, active) = {
            let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
            (r.user_id, r.is_active())
        };
        if !caller.can_access(owner) {
            return Err(EngineError::Forbidden("not the reservation owner"));
        }
        if !active {
            return Err(EngineError::AlreadyCancelled(id));
        }

        let event = Event::ReservationCancelled {
            id,
            resource_id,
            cancelled_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(resource_id)
    }

    /// Cancelled reservations past the retention window, as
    /// `(reservation_id, resource_id)` pairs. Called by the reaper.
    pub fn collect_purgeable(&self, now: Ms, retention_ms: Ms) -> Vec<(Ulid, Ulid)> {
        let mut purgeable = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for r in &guard.reservations {
                    if let Some(cancelled_at) = r.cancelled_at
                        && cancelled_at + retention_ms <= now
                    {
                        purgeable.push((r.id, guard.id));
                    }
                }
            }
        }
        purgeable
    }

    pub async fn purge_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        match guard.reservation(id) {
            Some(r) if !r.is_active() => {}
            Some(_) => {
                return Err(EngineError::InvalidRequest("cannot purge an active reservation"));
            }
            None => return Err(EngineError::NotFound(id)),
        }
        let event = Event::ReservationPurged { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(resource_id)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for user in self.users.iter() {
            events.push(Event::UserRegistered {
                id: user.id,
                email: user.email.clone(),
                password_hash: user.password_hash.clone(),
                role: user.role,
            });
        }
        for cat in self.categories.iter() {
            events.push(Event::CategoryCreated {
                id: cat.id,
                name: cat.name.clone(),
            });
        }
        for slot in self.slots() {
            let guard = slot.read().await;
            events.push(Event::ResourceCreated {
                id: guard.id,
                name: guard.name.clone(),
                description: guard.description.clone(),
                category_id: guard.category_id,
                is_active: guard.is_active,
            });
            for f in &guard.fields {
                events.push(Event::FieldAdded {
                    id: f.id,
                    resource_id: guard.id,
                    key: f.key.clone(),
                    value: f.value.clone(),
                });
            }
            for r in &guard.reservations {
                events.push(Event::ReservationBooked {
                    id: r.id,
                    resource_id: guard.id,
                    user_id: r.user_id,
                    span: r.span,
                });
                if let Some(cancelled_at) = r.cancelled_at {
                    events.push(Event::ReservationCancelled {
                        id: r.id,
                        resource_id: guard.id,
                        cancelled_at,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
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
