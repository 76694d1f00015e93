use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::Ms;

const REAP_INTERVAL: Duration = Duration::from_secs(60);
const COMPACT_INTERVAL: Duration = Duration::from_secs(30);

fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Background task that purges cancelled reservations once they age past
/// the retention window. Active reservations are never touched.
pub async fn run_reaper(engine: Arc<Engine>, retention_ms: Ms) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        interval.tick().await;
        let now = now_ms();
        for (reservation_id, _resource_id) in engine.collect_purgeable(now, retention_ms) {
            match engine.purge_reservation(reservation_id).await {
                Ok(_) => info!("purged cancelled reservation {reservation_id}"),
                Err(e) => {
                    // May already be gone — that's fine
                    tracing::debug!("reaper skip {reservation_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_INTERVAL);
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Caller, Role};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("reservd_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_collects_expired_cancellations() {
        let path = test_wal_path("reaper_collect.wal");
        let engine = Arc::new(Engine::new(path).unwrap());

        let admin_info = engine
            .register_with_role("admin@example.com", "admin-password", Role::Admin)
            .await
            .unwrap();
        let admin = Caller {
            id: admin_info.id,
            role: admin_info.role,
        };

        let rid = Ulid::new();
        engine
            .create_resource(&admin, rid, "Room", None, None)
            .await
            .unwrap();

        let res_id = Ulid::new();
        engine
            .book(&admin, res_id, rid, 1000, 2000)
            .await
            .unwrap();
        engine.cancel_reservation(&admin, res_id).await.unwrap();

        // Zero retention: the cancelled row is immediately purgeable
        let purgeable = engine.collect_purgeable(now_ms() + 1, 0);
        assert_eq!(purgeable.len(), 1);
        assert_eq!(purgeable[0].0, res_id);

        engine.purge_reservation(res_id).await.unwrap();

        let after = engine.collect_purgeable(now_ms() + 1, 0);
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn active_reservations_are_not_purgeable() {
        let path = test_wal_path("reaper_active.wal");
        let engine = Arc::new(Engine::new(path).unwrap());

        let admin_info = engine
            .register_with_role("admin@example.com", "admin-password", Role::Admin)
            .await
            .unwrap();
        let admin = Caller {
            id: admin_info.id,
            role: admin_info.role,
        };

        let rid = Ulid::new();
        engine
            .create_resource(&admin, rid, "Room", None, None)
            .await
            .unwrap();
        engine
            .book(&admin, Ulid::new(), rid, 1000, 2000)
            .await
            .unwrap();

        assert!(engine.collect_purgeable(now_ms() + 1, 0).is_empty());
    }
}
