use crate::model::Ms;

/// Hard limits. These bound memory per tenant and keep WAL replay sane;
/// exceeding one is a `LimitExceeded` error, never silent truncation.

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_USERS_PER_TENANT: usize = 10_000;
pub const MAX_CATEGORIES_PER_TENANT: usize = 1_000;
pub const MAX_RESOURCES_PER_TENANT: usize = 10_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;
pub const MAX_FIELDS_PER_RESOURCE: usize = 256;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_FIELD_KEY_LEN: usize = 255;
pub const MAX_FIELD_VALUE_LEN: usize = 255;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z — anything later is a client bug.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// One year. No single reservation may span longer.
pub const MAX_SPAN_DURATION_MS: Ms = 31_536_000_000;
