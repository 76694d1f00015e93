use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[allow(dead_code)]
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Caller role. Closed enumeration — authorization goes through the
/// capability predicates on [`Caller`], never string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Authenticated caller identity, resolved per command from the user table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: Ulid,
    pub role: Role,
}

impl Caller {
    /// May perform admin-gated mutations (user/category/resource CRUD).
    pub fn can_manage(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// May read or cancel an entity owned by `owner`.
    pub fn can_access(&self, owner: Ulid) -> bool {
        self.can_manage() || self.id == owner
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Ulid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: Ulid,
    pub name: String,
}

/// Free-form key/value attached to a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomField {
    pub id: Ulid,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Active,
    Cancelled,
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationStatus::Active => write!(f, "active"),
            ReservationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single reservation on a resource. Created only by admission; the only
/// mutation applied afterwards is the cancellation status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
    pub cancelled_at: Option<Ms>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}

/// Per-resource state guarded by one `RwLock`: the resource record, its
/// custom fields, and every reservation that has not been purged yet.
/// The write guard is the per-resource admission serialization point.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub category_id: Option<Ulid>,
    pub is_active: bool,
    pub fields: Vec<CustomField>,
    /// All reservations (active + not-yet-purged cancelled), sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(
        id: Ulid,
        name: String,
        description: Option<String>,
        category_id: Option<Ulid>,
        is_active: bool,
    ) -> Self {
        Self {
            id,
            name,
            description,
            category_id,
            is_active,
            fields: Vec::new(),
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Remove reservation by id.
    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn has_active_reservations(&self) -> bool {
        self.reservations.iter().any(Reservation::is_active)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        email: String,
        password_hash: String,
        role: Role,
    },
    UserUpdated {
        id: Ulid,
        email: String,
        password_hash: String,
    },
    UserDeleted {
        id: Ulid,
    },
    CategoryCreated {
        id: Ulid,
        name: String,
    },
    CategoryUpdated {
        id: Ulid,
        name: String,
    },
    CategoryDeleted {
        id: Ulid,
    },
    ResourceCreated {
        id: Ulid,
        name: String,
        description: Option<String>,
        category_id: Option<Ulid>,
        is_active: bool,
    },
    ResourceUpdated {
        id: Ulid,
        name: String,
        description: Option<String>,
        category_id: Option<Ulid>,
        is_active: bool,
    },
    ResourceDeleted {
        id: Ulid,
    },
    FieldAdded {
        id: Ulid,
        resource_id: Ulid,
        key: String,
        value: String,
    },
    FieldRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    ReservationBooked {
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        span: Span,
    },
    ReservationCancelled {
        id: Ulid,
        resource_id: Ulid,
        cancelled_at: Ms,
    },
    ReservationPurged {
        id: Ulid,
        resource_id: Ulid,
    },
}

// ── Partial updates ──────────────────────────────────────────────

/// Explicit partial update for a user: each field independently
/// present-or-absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Explicit partial update for a resource. The nested `Option` on nullable
/// fields distinguishes "leave unchanged" (outer `None`) from "clear"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub category_id: Option<Option<Ulid>>,
    pub is_active: Option<bool>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Ulid,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryInfo {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub category_id: Option<Ulid>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub status: ReservationStatus,
}
