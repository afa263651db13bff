use auth_server::auth::TokenCache;
use auth_server::auth::cache::{RefreshMarker, refresh_key};
use auth_server::test_support::TestRedis;
use chrono::Duration;

#[tokio::test]
async fn set_then_get_round_trips_markers() {
    let redis = match TestRedis::new().await {
        Ok(redis) => redis,
        Err(err) => {
            eprintln!("skipping redis cache test: {err}");
            return;
        }
    };
    let cache = redis.cache();
    let key = refresh_key("some.refresh.token");

    assert_eq!(cache.get(&key).await.expect("get missing"), None);

    cache
        .set(&key, RefreshMarker::Valid.as_str(), Duration::seconds(60))
        .await
        .expect("set valid");
    let stored = cache.get(&key).await.expect("get valid");
    assert_eq!(
        RefreshMarker::from_cached(stored.as_deref()),
        RefreshMarker::Valid
    );

    cache
        .set(&key, RefreshMarker::Invalid.as_str(), Duration::seconds(60))
        .await
        .expect("set invalid");
    let stored = cache.get(&key).await.expect("get invalid");
    assert_eq!(
        RefreshMarker::from_cached(stored.as_deref()),
        RefreshMarker::Invalid
    );
}

#[tokio::test]
async fn entries_expire_with_their_ttl() {
    let redis = match TestRedis::new().await {
        Ok(redis) => redis,
        Err(err) => {
            eprintln!("skipping redis cache test: {err}");
            return;
        }
    };
    let cache = redis.cache();
    let key = refresh_key("short.lived.token");

    cache
        .set(&key, RefreshMarker::Valid.as_str(), Duration::seconds(1))
        .await
        .expect("set valid");
    assert!(cache.get(&key).await.expect("get").is_some());

    tokio::time::sleep(std::time::Duration::from_millis(2_100)).await;
    assert_eq!(cache.get(&key).await.expect("get expired"), None);
}
