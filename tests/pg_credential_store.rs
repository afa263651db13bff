use auth_server::auth::{AuthError, CredentialRecord, CredentialStore, PgCredentialStore};
use auth_server::test_support::{TestDatabase, test_epoch};
use chrono::Duration;

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new().await {
        Ok(db) => Some(db),
        Err(err) => {
            eprintln!("skipping postgres store test: {err}");
            None
        }
    }
}

fn record(login: &str) -> CredentialRecord {
    CredentialRecord {
        login: login.to_string(),
        password_hash: "$argon2id$v=19$m=1024,t=1,p=1$c2FsdHNhbHQ$aGFzaGhhc2g".to_string(),
        salt: "c2FsdA==".to_string(),
    }
}

#[tokio::test]
async fn insert_find_and_duplicate() {
    let Some(test_db) = provision().await else {
        return;
    };
    let store = PgCredentialStore::new(test_db.pool_clone());

    assert!(!store.exists_by_login("alice").await.expect("exists query"));
    assert!(store.find_by_login("alice").await.expect("find query").is_none());

    store.insert(&record("alice")).await.expect("first insert");

    assert!(store.exists_by_login("alice").await.expect("exists query"));
    let found = store
        .find_by_login("alice")
        .await
        .expect("find query")
        .expect("record present");
    assert_eq!(found, record("alice"));

    let duplicate = store.insert(&record("alice")).await;
    assert!(matches!(duplicate, Err(AuthError::UserExists)));

    test_db.close().await;
}

#[tokio::test]
async fn refresh_sessions_upsert_and_expire() {
    let Some(test_db) = provision().await else {
        return;
    };
    let store = PgCredentialStore::new(test_db.pool_clone());
    let now = test_epoch();

    store.insert(&record("alice")).await.expect("insert alice");
    store.insert(&record("bob")).await.expect("insert bob");

    store
        .record_refresh_session("alice", "dev-1", now, now + Duration::days(30))
        .await
        .expect("alice session");
    store
        .record_refresh_session("bob", "dev-1", now, now + Duration::days(30))
        .await
        .expect("bob session");

    let later = now + Duration::hours(1);
    store
        .record_refresh_session("alice", "dev-1", later, later + Duration::days(30))
        .await
        .expect("alice session upsert");

    let sessions = store.sessions_for_device("dev-1").await.expect("sessions");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].login, "alice");
    assert_eq!(sessions[0].issued_at, later);
    assert_eq!(sessions[1].login, "bob");

    let revoked_at = later + Duration::minutes(5);
    let touched = store
        .expire_refresh_sessions_for_device("dev-1", revoked_at)
        .await
        .expect("expire sessions");
    assert_eq!(touched, 2);

    let sessions = store.sessions_for_device("dev-1").await.expect("sessions");
    assert!(sessions.iter().all(|s| s.expires_at == revoked_at));

    let touched_again = store
        .expire_refresh_sessions_for_device("dev-1", revoked_at)
        .await
        .expect("expire sessions");
    assert_eq!(touched_again, 0);

    test_db.close().await;
}
