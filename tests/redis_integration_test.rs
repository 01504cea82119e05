//! Remote engine integration tests.
//!
//! These tests require a running Redis (8+) or Valkey (9+) instance; per-field TTL
//! tests additionally need `HSETEX`/`HGETEX` support and skip without it.
//!
//! ## Quick Start
//!
//! ```bash
//! docker run --rm -p 6379:6379 valkey/valkey:9
//! cargo test --features redis --test redis_integration_test
//! ```
//!
//! ## Environment Variables
//!
//! - `TEST_REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
//!
//! ## What's Tested
//!
//! 1. Connection, health check and address validation
//! 2. Basic set/get, TTL expiry, touch on keys and hash fields
//! 3. Batch delete counts
//! 4. Atomic counters under concurrent load
//! 5. Hash fields with independent TTLs
//! 6. Quorum locks: exclusion, blocking acquisition, lease renewal
//! 7. Namespace isolation

#![cfg(feature = "redis")]

use std::env;
use std::time::Duration;
use svc_cache::backend::RemoteCache;
use svc_cache::{new_cache, Cache, CacheConfig, CacheMode, CacheService, Capabilities, Error, FieldTtl};
use uuid::Uuid;

/// Helper: Get Redis connection URL from environment or use default
fn get_redis_url() -> String {
    env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Helper: Config for a fresh namespace so runs never see each other's keys
fn test_config<T>(prefix: &str) -> CacheConfig<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned + 'static,
{
    CacheConfig::<T>::new(format!("it-{}-{}", prefix, Uuid::now_v7()))
        .with_mode(CacheMode::Remote)
        .with_remote_address(get_redis_url())
}

/// Helper: Build a remote cache, or `None` when no server answers
async fn connect<T>(config: CacheConfig<T>) -> Option<CacheService<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let _ = env_logger::builder().is_test(true).try_init();
    match new_cache(config).await {
        Ok((cache, _release)) => Some(cache),
        Err(e) => {
            println!("⚠️  Redis not available ({}), skipping test", e);
            None
        }
    }
}

/// Helper: Check the server understands per-field TTL commands
async fn supports_field_ttl(cache: &CacheService<String>) -> bool {
    match cache
        .hset_with_ttl("field-ttl-check", "f", "v".to_string(), Duration::from_secs(5))
        .await
    {
        Ok(()) => true,
        Err(e) => {
            println!("⚠️  Server lacks HSETEX ({}), skipping test", e);
            false
        }
    }
}

// =============================================================================
// Test 1: Connection
// =============================================================================

#[tokio::test]
async fn test_redis_connection() {
    let Some(cache) = connect(test_config::<String>("conn")).await else {
        return;
    };

    assert!(!cache.is_local());
    assert_eq!(cache.capabilities(), Capabilities::REMOTE);
    println!("✓ Redis connection successful");
}

#[tokio::test]
async fn test_address_validated_after_pool_exists() {
    // Pools connect lazily, so building a cache needs no server.
    RemoteCache::new(&test_config::<String>("first"))
        .await
        .expect("Failed to create first remote cache");

    let sentinel = CacheConfig::<String>::new("sentinel")
        .with_mode(CacheMode::Sentinel)
        .with_remote_address("localhost:26379");
    assert!(matches!(
        RemoteCache::new(&sentinel).await,
        Err(Error::ConfigError(_))
    ));
    assert!(matches!(new_cache(sentinel).await, Err(Error::ConfigError(_))));

    let malformed = CacheConfig::<String>::new("malformed")
        .with_mode(CacheMode::Remote)
        .with_remote_address("redis://localhost:notaport");
    assert!(matches!(
        RemoteCache::new(&malformed).await,
        Err(Error::ConfigError(_))
    ));
}

// =============================================================================
// Test 2: Basic Set/Get and TTL
// =============================================================================

#[tokio::test]
async fn test_redis_basic_set_get() {
    let Some(cache) = connect(test_config::<String>("basic")).await else {
        return;
    };

    cache
        .set("key1", "Hello from svc-cache!".to_string())
        .await
        .expect("SET should succeed");

    let value = cache.get("key1").await.expect("GET should not error");
    assert_eq!(value.as_deref(), Some("Hello from svc-cache!"));
    assert_eq!(cache.get("missing").await.expect("GET should not error"), None);

    cache.delete("key1").await.expect("DELETE should succeed");
    assert_eq!(cache.get("key1").await.expect("GET should not error"), None);
}

#[tokio::test]
async fn test_redis_ttl_expiry() {
    let Some(cache) = connect(test_config::<String>("ttl")).await else {
        return;
    };

    cache
        .set_with_ttl("short", "v".to_string(), Duration::from_millis(100))
        .await
        .expect("SET should succeed");
    assert!(cache.get("short").await.expect("GET").is_some());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cache.get("short").await.expect("GET").is_none());

    cache.set("later", "v".to_string()).await.expect("SET should succeed");
    cache
        .expire("later", Duration::from_millis(100))
        .await
        .expect("EXPIRE should succeed");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cache.get("later").await.expect("GET").is_none());
}

#[tokio::test]
async fn test_redis_touch_extends_ttl() {
    let touched = test_config::<String>("touch")
        .with_default_ttl(Duration::from_secs(2))
        .with_touch(true);
    let Some(touched) = connect(touched).await else {
        return;
    };
    let plain = test_config::<String>("notouch").with_default_ttl(Duration::from_secs(2));
    let Some(plain) = connect(plain).await else {
        return;
    };

    touched.set("k", "v".to_string()).await.expect("SET");
    plain.set("k", "v".to_string()).await.expect("SET");

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(touched.get("k").await.expect("GET").is_some());
    assert!(plain.get("k").await.expect("GET").is_some());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(touched.get("k").await.expect("GET").is_some(), "read should have reset the TTL");
    assert!(plain.get("k").await.expect("GET").is_none(), "read must not extend the TTL");
}

#[tokio::test]
async fn test_redis_touch_extends_field_ttl() {
    let touched = test_config::<String>("ftouch")
        .with_default_ttl(Duration::from_secs(2))
        .with_touch(true);
    let Some(touched) = connect(touched).await else {
        return;
    };
    if !supports_field_ttl(&touched).await {
        return;
    }
    let plain = test_config::<String>("fnotouch").with_default_ttl(Duration::from_secs(2));
    let Some(plain) = connect(plain).await else {
        return;
    };

    // One session hash per user, one field per device.
    for cache in [&touched, &plain] {
        cache
            .hset_with_ttl("user:1", "mobile", "token-m".to_string(), Duration::from_secs(2))
            .await
            .expect("HSETEX should succeed");
    }

    // Read every second past the original 2 s lifetime.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let value = touched.hget("user:1", "mobile").await.expect("HGETEX");
        assert_eq!(value.as_deref(), Some("token-m"), "read should have reset the field TTL");
    }
    assert!(touched.httl("user:1", "mobile").await.expect("HTTL").exists());

    // Untouched twin: 3 s have passed, the field is gone.
    assert_eq!(plain.hget("user:1", "mobile").await.expect("HGET"), None);
}

// =============================================================================
// Test 3: Batch Delete
// =============================================================================

#[tokio::test]
async fn test_redis_delete_multi_counts() {
    let Some(cache) = connect(test_config::<u32>("mdel")).await else {
        return;
    };

    for (i, key) in ["a", "b", "c"].iter().enumerate() {
        cache.set(key, i as u32).await.expect("SET should succeed");
    }

    let removed = cache
        .delete_multi(&["a", "b", "c", "missing"])
        .await
        .expect("DEL should succeed");
    assert_eq!(removed, 3);
    assert_eq!(cache.delete_multi(&[]).await.expect("DEL"), 0);
}

// =============================================================================
// Test 4: Counters
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_counter_atomicity() {
    let Some(cache) = connect(test_config::<i64>("counter")).await else {
        return;
    };

    let tasks = 20;
    let per_task = 50;
    let mut handles = vec![];
    for _ in 0..tasks {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..per_task {
                cache.increment("hits", 1).await.expect("INCRBY should succeed");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("Task failed");
    }

    assert_eq!(cache.get("hits").await.expect("GET"), Some(tasks * per_task));
    assert_eq!(
        cache.decrement("hits", tasks * per_task).await.expect("DECRBY"),
        0
    );
}

#[tokio::test]
async fn test_redis_counter_wrong_type() {
    let Some(cache) = connect(test_config::<String>("wrongtype")).await else {
        return;
    };

    cache.set("name", "alice".to_string()).await.expect("SET");
    let result = cache.increment("name", 1).await;
    assert!(matches!(result, Err(Error::WrongType(_))), "got {:?}", result.err());
}

// =============================================================================
// Test 5: Hash Fields
// =============================================================================

#[tokio::test]
async fn test_redis_hash_basic() {
    let Some(cache) = connect(test_config::<String>("hash")).await else {
        return;
    };

    cache.hset("user:1", "name", "alice".to_string()).await.expect("HSET");
    cache.hset("user:1", "role", "admin".to_string()).await.expect("HSET");

    assert_eq!(
        cache.hget("user:1", "name").await.expect("HGET").as_deref(),
        Some("alice")
    );
    let all = cache.hget_all("user:1").await.expect("HGETALL");
    assert_eq!(all.len(), 2);

    cache.hdel("user:1", &["role"]).await.expect("HDEL");
    assert_eq!(cache.hget("user:1", "role").await.expect("HGET"), None);
    assert!(cache.hget_all("nobody").await.expect("HGETALL").is_empty());
}

#[tokio::test]
async fn test_redis_per_field_ttl() {
    let Some(cache) = connect(test_config::<String>("fieldttl")).await else {
        return;
    };
    if !supports_field_ttl(&cache).await {
        return;
    }

    cache
        .hset_with_ttl("h", "short", "v".to_string(), Duration::from_secs(1))
        .await
        .expect("HSETEX");
    cache.hset("h", "long", "v".to_string()).await.expect("HSET");

    assert_eq!(cache.httl("h", "long").await.expect("HTTL"), FieldTtl::Persistent);
    assert_eq!(cache.httl("h", "nope").await.expect("HTTL"), FieldTtl::Missing);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(cache.hget("h", "short").await.expect("HGET"), None);
    assert!(cache.hget("h", "long").await.expect("HGET").is_some());

    assert!(cache
        .hexpire("h", "long", Duration::from_secs(10))
        .await
        .expect("HPEXPIRE"));
    assert!(!cache
        .hexpire("h", "nope", Duration::from_secs(10))
        .await
        .expect("HPEXPIRE"));
    match cache.httl("h", "long").await.expect("HTTL") {
        FieldTtl::Expires(ttl) => assert!(ttl <= Duration::from_secs(10) && ttl >= Duration::from_secs(8)),
        other => panic!("expected a field TTL, got {:?}", other),
    }
}

// =============================================================================
// Test 6: Locks
// =============================================================================

#[tokio::test]
async fn test_redis_lock_exclusion_and_reacquire() {
    let Some(cache) = connect(test_config::<String>("lock")).await else {
        return;
    };

    let guard = cache.try_lock("job").await.expect("first lock");
    assert!(matches!(cache.try_lock("job").await, Err(Error::NotLocked)));

    let ctx = guard.context();
    guard.release().await;
    assert!(ctx.is_cancelled());

    let again = cache.try_lock("job").await.expect("re-acquire after release");
    again.release().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_redis_blocking_lock_waits() {
    let Some(cache) = connect(test_config::<String>("blocking")).await else {
        return;
    };

    let guard = cache.lock("job").await.expect("first lock");
    let waiter = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.lock("job").await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished(), "waiter must block while the lock is held");

    guard.release().await;
    let acquired = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should acquire after release")
        .expect("Task failed")
        .expect("lock should succeed");
    acquired.release().await;
}

#[tokio::test]
async fn test_redis_lock_lease_is_renewed() {
    let config = test_config::<String>("lease").with_lock_validity(Duration::from_millis(500));
    let Some(cache) = connect(config).await else {
        return;
    };

    let guard = cache.try_lock("job").await.expect("lock");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(!guard.is_lost(), "renewal should keep the lease alive");
    assert!(matches!(cache.try_lock("job").await, Err(Error::NotLocked)));
    guard.release().await;
}

#[tokio::test]
async fn test_redis_lock_timeout_via_tokio() {
    let Some(cache) = connect(test_config::<String>("timeout")).await else {
        return;
    };

    let guard = cache.try_lock("job").await.expect("lock");
    let waited = tokio::time::timeout(Duration::from_millis(200), cache.lock("job")).await;
    assert!(waited.is_err(), "lock should still be held");
    guard.release().await;
}

// =============================================================================
// Test 7: Namespaces
// =============================================================================

#[tokio::test]
async fn test_redis_namespace_isolation() {
    let Some(users) = connect(test_config::<String>("users")).await else {
        return;
    };
    let Some(orders) = connect(test_config::<String>("orders")).await else {
        return;
    };

    users.set("1", "alice".to_string()).await.expect("SET");
    orders.set("1", "order-1".to_string()).await.expect("SET");

    assert_eq!(users.get("1").await.expect("GET").as_deref(), Some("alice"));
    assert_eq!(orders.get("1").await.expect("GET").as_deref(), Some("order-1"));

    users.delete_multi(&["1"]).await.expect("DEL");
    assert!(orders.get("1").await.expect("GET").is_some());
}
