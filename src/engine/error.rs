use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    EmailTaken(String),
    NameTaken(String),
    /// Requested window overlaps the given active reservation.
    Conflict(Ulid),
    ResourceInactive(Ulid),
    InvalidInterval { start: Ms, end: Ms },
    AlreadyCancelled(Ulid),
    HasReservations(Ulid),
    CategoryInUse(Ulid),
    Forbidden(&'static str),
    Unauthorized(&'static str),
    InvalidRequest(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::EmailTaken(email) => write!(f, "email already registered: {email}"),
            EngineError::NameTaken(name) => write!(f, "name already taken: {name}"),
            EngineError::Conflict(id) => {
                write!(f, "window overlaps active reservation: {id}")
            }
            EngineError::ResourceInactive(id) => write!(f, "resource inactive: {id}"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval: [{start}, {end})")
            }
            EngineError::AlreadyCancelled(id) => write!(f, "already cancelled: {id}"),
            EngineError::HasReservations(id) => {
                write!(f, "cannot delete {id}: has active reservations")
            }
            EngineError::CategoryInUse(id) => {
                write!(f, "cannot delete category {id}: still referenced by resources")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
