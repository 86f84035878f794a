#![allow(dead_code)]

use std::time::Duration;
use tempfile::TempDir;
use tenantchat::{Database, DatabaseSettings, NewTenant, Tenant};

/// File-backed database in a temp dir, so several pooled connections share it.
pub struct TestDb {
    pub db: Database,
    _dir: TempDir,
}

pub async fn spawn_db() -> TestDb {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("tenantchat-test.sqlite");
    let settings = DatabaseSettings {
        url: format!("sqlite://{}", path.display()),
        max_connections: 5,
        busy_timeout: Duration::from_secs(10),
    };
    let db = Database::connect(&settings)
        .await
        .expect("Failed to connect to test database");
    TestDb { db, _dir: dir }
}

pub async fn seed_tenant(db: &Database, slug: &str) -> Tenant {
    db.tenants()
        .upsert_by_slug(&NewTenant::new(slug, format!("{} Inc", slug), format!("{}-key", slug)))
        .await
        .expect("Failed to seed tenant")
}
