mod common;

use futures::future::join_all;
use tenantchat::conversations::DEFAULT_MAX_PAGE_SIZE;
use tenantchat::{Role, StoreError, TenantId};
use uuid::Uuid;

#[tokio::test]
async fn recent_messages_are_newest_first_and_limited() {
    let app = common::spawn_db().await;
    let tenant = common::seed_tenant(&app.db, "acme").await;
    let repo = app.db.conversations(DEFAULT_MAX_PAGE_SIZE);

    for i in 0..10 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        repo.append_message(tenant.id, "visitor-1", role, &format!("message {}", i))
            .await
            .unwrap();
    }

    let recent = repo.list_recent_messages(tenant.id, "visitor-1", 5).await.unwrap();
    let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["message 9", "message 8", "message 7", "message 6", "message 5"]
    );
    assert!(recent.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    assert_eq!(recent[0].role, Role::Assistant);
    assert_eq!(repo.count_messages(tenant.id, "visitor-1").await.unwrap(), 10);
}

#[tokio::test]
async fn colliding_visitor_ids_never_leak_across_tenants() {
    let app = common::spawn_db().await;
    let acme = common::seed_tenant(&app.db, "acme").await;
    let globex = common::seed_tenant(&app.db, "globex").await;
    let repo = app.db.conversations(DEFAULT_MAX_PAGE_SIZE);

    repo.append_message(acme.id, "shared-visitor", Role::User, "acme question")
        .await
        .unwrap();
    repo.append_message(globex.id, "shared-visitor", Role::User, "globex question")
        .await
        .unwrap();
    repo.append_message(globex.id, "shared-visitor", Role::Assistant, "globex answer")
        .await
        .unwrap();

    let acme_messages = repo
        .list_recent_messages(acme.id, "shared-visitor", 50)
        .await
        .unwrap();
    assert_eq!(acme_messages.len(), 1);
    assert_eq!(acme_messages[0].content, "acme question");

    let globex_messages = repo
        .list_recent_messages(globex.id, "shared-visitor", 50)
        .await
        .unwrap();
    assert_eq!(globex_messages.len(), 2);
    assert!(globex_messages.iter().all(|m| m.content.starts_with("globex")));

    let acme_session = repo.find_session(acme.id, "shared-visitor").await.unwrap().unwrap();
    let globex_session = repo.find_session(globex.id, "shared-visitor").await.unwrap().unwrap();
    assert_ne!(acme_session.id, globex_session.id);
    assert_ne!(acme_session.end_user_id, globex_session.end_user_id);

    let stats = app.db.stats().await.unwrap();
    assert_eq!(stats.end_users, 2);
    assert_eq!(stats.chat_sessions, 2);
}

#[tokio::test]
async fn session_ids_resolve_only_within_their_tenant() {
    let app = common::spawn_db().await;
    let acme = common::seed_tenant(&app.db, "acme").await;
    let globex = common::seed_tenant(&app.db, "globex").await;
    let repo = app.db.conversations(DEFAULT_MAX_PAGE_SIZE);

    let message = repo
        .append_message(acme.id, "visitor", Role::User, "hello")
        .await
        .unwrap();

    let session = repo.get_session(acme.id, message.session_id).await.unwrap();
    assert_eq!(session.tenant_id, acme.id);

    let err = repo.get_session(globex.id, message.session_id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "chat session", .. }));

    let err = repo.get_session(acme.id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_contact_creates_one_user_and_one_session() {
    let app = common::spawn_db().await;
    let tenant = common::seed_tenant(&app.db, "acme").await;
    let repo = app.db.conversations(DEFAULT_MAX_PAGE_SIZE);

    const N: usize = 12;
    let tenant_id = tenant.id;
    let results = join_all((0..N).map(|i| {
        let repo = &repo;
        async move {
            repo.append_message(tenant_id, "new-visitor", Role::User, &format!("burst {}", i))
                .await
        }
    }))
    .await;

    let messages: Vec<_> = results.into_iter().collect::<Result<_, _>>().unwrap();
    let session_id = messages[0].session_id;
    assert!(messages.iter().all(|m| m.session_id == session_id));

    let stats = app.db.stats().await.unwrap();
    assert_eq!(stats.end_users, 1);
    assert_eq!(stats.chat_sessions, 1);
    assert_eq!(stats.chat_messages, N as i64);

    let stored = repo
        .list_recent_messages(tenant.id, "new-visitor", N as u32)
        .await
        .unwrap();
    assert_eq!(stored.len(), N);
    assert!(stored.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_visitors_do_not_interfere() {
    let app = common::spawn_db().await;
    let tenant = common::seed_tenant(&app.db, "acme").await;
    let repo = app.db.conversations(DEFAULT_MAX_PAGE_SIZE);

    let tenant_id = tenant.id;
    let results = join_all((0..6).map(|i| {
        let repo = &repo;
        async move {
            let visitor = format!("visitor-{}", i);
            repo.append_message(tenant_id, &visitor, Role::User, "hi").await?;
            repo.append_message(tenant_id, &visitor, Role::Assistant, "hello").await
        }
    }))
    .await;
    assert!(results.iter().all(Result::is_ok));

    let stats = app.db.stats().await.unwrap();
    assert_eq!(stats.end_users, 6);
    assert_eq!(stats.chat_sessions, 6);
    assert_eq!(stats.chat_messages, 12);

    for i in 0..6 {
        let count = repo
            .count_messages(tenant.id, &format!("visitor-{}", i))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}

#[tokio::test]
async fn unknown_visitor_gets_an_empty_history() {
    let app = common::spawn_db().await;
    let tenant = common::seed_tenant(&app.db, "acme").await;
    let repo = app.db.conversations(DEFAULT_MAX_PAGE_SIZE);

    let messages = repo.list_recent_messages(tenant.id, "nobody", 10).await.unwrap();
    assert!(messages.is_empty());
    assert!(repo.find_session(tenant.id, "nobody").await.unwrap().is_none());
    assert!(repo.find_end_user(tenant.id, "nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_tenant_history_is_not_found() {
    let app = common::spawn_db().await;
    let repo = app.db.conversations(DEFAULT_MAX_PAGE_SIZE);

    let err = repo
        .list_recent_messages(TenantId::new(), "visitor", 10)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "tenant", .. }));
}

#[tokio::test]
async fn configured_page_size_bounds_the_limit() {
    let app = common::spawn_db().await;
    let tenant = common::seed_tenant(&app.db, "acme").await;
    let repo = app.db.conversations(3);

    for i in 0..5 {
        repo.append_message(tenant.id, "visitor", Role::User, &format!("m{}", i))
            .await
            .unwrap();
    }

    assert_eq!(repo.list_recent_messages(tenant.id, "visitor", 3).await.unwrap().len(), 3);
    let err = repo.list_recent_messages(tenant.id, "visitor", 4).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    let err = repo.list_recent_messages(tenant.id, "visitor", 0).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}
