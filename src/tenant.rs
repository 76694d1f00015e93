use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::engine::Engine;
use crate::limits::*;
use crate::model::Ms;
use crate::reaper;

/// Initial admin account created for every fresh tenant.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL +
/// background maintenance tasks. Tenant = database name from the pgwire
/// connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    retention_ms: Ms,
    admin: Option<AdminSeed>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, retention_ms: Ms) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            retention_ms,
            admin: None,
        }
    }

    pub fn with_admin(mut self, admin: Option<AdminSeed>) -> Self {
        self.admin = admin;
        self
    }

    /// Get or lazily create an engine for the given tenant.
    pub async fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path)?);

        // Two connections may race to create the same tenant; only the
        // winner keeps its engine and spawns the background tasks.
        let engine = match self.engines.entry(tenant.to_string()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(engine.clone());
                engine
            }
        };

        let reaper_engine = engine.clone();
        let retention = self.retention_ms;
        tokio::spawn(async move {
            reaper::run_reaper(reaper_engine, retention).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);

        if let Some(seed) = &self.admin
            && let Err(e) = engine.ensure_admin(&seed.email, &seed.password).await
        {
            tracing::error!("admin seed failed for tenant {tenant}: {e}");
        }

        Ok(engine)
    }
}
