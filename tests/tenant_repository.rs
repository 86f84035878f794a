mod common;

use tenantchat::models::DEFAULT_FALLBACK_MESSAGE;
use tenantchat::{NewTenant, StoreError, TenantId};

#[tokio::test]
async fn upsert_by_slug_twice_keeps_a_single_row() {
    let app = common::spawn_db().await;
    let repo = app.db.tenants();

    let first = repo
        .upsert_by_slug(&NewTenant::new("demo", "Demo Company", "demo-key"))
        .await
        .unwrap();
    let second = repo
        .upsert_by_slug(&NewTenant::new("demo", "Another Name", "demo-key"))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.name, "Demo Company");
    assert_eq!(app.db.stats().await.unwrap().tenants, 1);
}

#[tokio::test]
async fn api_key_collision_with_another_tenant_is_a_constraint_violation() {
    let app = common::spawn_db().await;
    let repo = app.db.tenants();

    repo.upsert_by_slug(&NewTenant::new("acme", "Acme", "shared-key"))
        .await
        .unwrap();
    let err = repo
        .upsert_by_slug(&NewTenant::new("globex", "Globex", "shared-key"))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::ConstraintViolation(_)), "got {:?}", err);
    assert_eq!(app.db.stats().await.unwrap().tenants, 1);
}

#[tokio::test]
async fn lookups_by_id_slug_and_api_key_agree() {
    let app = common::spawn_db().await;
    let tenant = common::seed_tenant(&app.db, "acme").await;
    let repo = app.db.tenants();

    assert_eq!(repo.find_by_id(tenant.id).await.unwrap(), tenant);
    assert_eq!(repo.find_by_slug("acme").await.unwrap(), tenant);
    assert_eq!(repo.find_by_api_key("acme-key").await.unwrap(), tenant);

    let err = repo.find_by_id(TenantId::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "tenant", .. }));
}

#[tokio::test]
async fn fallback_defaults_until_configured() {
    let app = common::spawn_db().await;
    let tenant = common::seed_tenant(&app.db, "acme").await;
    let repo = app.db.tenants();

    assert_eq!(
        repo.get_fallback_message(tenant.id).await.unwrap(),
        DEFAULT_FALLBACK_MESSAGE
    );
    let settings = repo.settings(tenant.id).await.unwrap();
    assert!(settings.default_fallback);

    let config = repo
        .set_fallback_message(tenant.id, "  Please email support@acme.test  ")
        .await
        .unwrap();
    assert_eq!(config.fallback_message, "Please email support@acme.test");
    assert_eq!(
        repo.get_fallback_message(tenant.id).await.unwrap(),
        "Please email support@acme.test"
    );

    repo.set_fallback_message(tenant.id, "Try again tomorrow").await.unwrap();
    let settings = repo.settings(tenant.id).await.unwrap();
    assert_eq!(settings.fallback_message, "Try again tomorrow");
    assert!(!settings.default_fallback);
    assert_eq!(app.db.stats().await.unwrap().chat_configs, 1);

    let reloaded = repo.find_by_id(tenant.id).await.unwrap();
    assert_eq!(
        reloaded.chat_config.map(|c| c.fallback_message),
        Some("Try again tomorrow".to_string())
    );
}

#[tokio::test]
async fn fallback_for_missing_tenant_is_not_found() {
    let app = common::spawn_db().await;
    let err = app
        .db
        .tenants()
        .get_fallback_message(TenantId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn empty_fallback_is_rejected() {
    let app = common::spawn_db().await;
    let tenant = common::seed_tenant(&app.db, "acme").await;
    let err = app
        .db
        .tenants()
        .set_fallback_message(tenant.id, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}
