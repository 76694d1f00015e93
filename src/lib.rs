//! Reservation-management backend speaking the Postgres wire protocol:
//! authenticated users book time-bounded access to shared resources, with
//! conflict-free interval admission enforced per resource.

pub mod auth;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
