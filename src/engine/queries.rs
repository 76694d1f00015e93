use ulid::Ulid;

use crate::auth;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    // ── Identity ─────────────────────────────────────────────

    /// Credential check for LOGIN. The failure is deliberately the same for
    /// an unknown email and a wrong password.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<UserInfo, EngineError> {
        let user = self
            .email_index
            .get(&email.to_lowercase())
            .and_then(|id| self.users.get(&id).map(|u| u.clone()));
        match user {
            Some(u) if auth::verify_password(password, &u.password_hash) => Ok(UserInfo {
                id: u.id,
                email: u.email,
                role: u.role,
            }),
            _ => Err(EngineError::Unauthorized("invalid credentials")),
        }
    }

    /// Resolve a caller identity for an already-validated token subject.
    /// `None` means the account no longer exists.
    pub fn resolve_caller(&self, id: Ulid) -> Option<Caller> {
        self.users.get(&id).map(|u| Caller {
            id: u.id,
            role: u.role,
        })
    }

    /// Profile of any user by id, without an authorization gate. Used for
    /// `SELECT CURRENT_USER` where the caller asks about itself.
    pub fn user_info(&self, id: Ulid) -> Option<UserInfo> {
        self.users.get(&id).map(|u| UserInfo {
            id: u.id,
            email: u.email.clone(),
            role: u.role,
        })
    }

    // ── Users ────────────────────────────────────────────────

    pub fn list_users(&self, caller: &Caller) -> Result<Vec<UserInfo>, EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        Ok(self
            .users
            .iter()
            .map(|u| UserInfo {
                id: u.id,
                email: u.email.clone(),
                role: u.role,
            })
            .collect())
    }

    pub fn get_user(&self, caller: &Caller, id: Ulid) -> Result<UserInfo, EngineError> {
        if !caller.can_manage() {
            return Err(EngineError::Forbidden("admin role required"));
        }
        self.user_info(id).ok_or(EngineError::NotFound(id))
    }

    // ── Categories ───────────────────────────────────────────

    pub fn list_categories(&self) -> Vec<CategoryInfo> {
        self.categories
            .iter()
            .map(|c| CategoryInfo {
                id: c.id,
                name: c.name.clone(),
            })
            .collect()
    }

    pub fn get_category(&self, id: Ulid) -> Result<CategoryInfo, EngineError> {
        self.categories
            .get(&id)
            .map(|c| CategoryInfo {
                id: c.id,
                name: c.name.clone(),
            })
            .ok_or(EngineError::NotFound(id))
    }

    // ── Resources ────────────────────────────────────────────

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut out = Vec::new();
        for slot in self.slots() {
            let guard = slot.read().await;
            out.push(ResourceInfo {
                id: guard.id,
                name: guard.name.clone(),
                description: guard.description.clone(),
                category_id: guard.category_id,
                is_active: guard.is_active,
            });
        }
        out
    }

    pub async fn get_resource(&self, id: Ulid) -> Result<ResourceInfo, EngineError> {
        let rs = self
            .get_resource_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(ResourceInfo {
            id: guard.id,
            name: guard.name.clone(),
            description: guard.description.clone(),
            category_id: guard.category_id,
            is_active: guard.is_active,
        })
    }

    /// Fields of one resource. An unknown resource yields an empty list.
    pub async fn list_fields(&self, resource_id: Ulid) -> Vec<FieldInfo> {
        let Some(rs) = self.get_resource_state(&resource_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        guard
            .fields
            .iter()
            .map(|f| FieldInfo {
                id: f.id,
                resource_id,
                key: f.key.clone(),
                value: f.value.clone(),
            })
            .collect()
    }

    // ── Reservations ─────────────────────────────────────────

    /// Admin sees every reservation; everyone else only their own.
    pub async fn list_reservations(&self, caller: &Caller) -> Vec<ReservationInfo> {
        let mut out = Vec::new();
        for slot in self.slots() {
            let guard = slot.read().await;
            for r in &guard.reservations {
                if caller.can_access(r.user_id) {
                    out.push(ReservationInfo {
                        id: r.id,
                        resource_id: guard.id,
                        user_id: r.user_id,
                        start: r.span.start,
                        end: r.span.end,
                        status: r.status,
                    });
                }
            }
        }
        out
    }

    pub async fn get_reservation(
        &self,
        caller: &Caller,
        id: Ulid,
    ) -> Result<ReservationInfo, EngineError> {
        let resource_id = self
            .get_resource_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_resource_state(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        // The entity index also tracks fields; a field id is NotFound here.
        let r = guard.reservation(id).ok_or(EngineError::NotFound(id))?;
        if !caller.can_access(r.user_id) {
            return Err(EngineError::Forbidden("not the reservation owner"));
        }
        Ok(ReservationInfo {
            id: r.id,
            resource_id,
            user_id: r.user_id,
            start: r.span.start,
            end: r.span.end,
            status: r.status,
        })
    }
}
