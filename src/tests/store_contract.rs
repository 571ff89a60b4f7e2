//! Shared tests for the client over any store backend
//!
//! Tests are written as async functions that take `&StoreClient`, allowing the
//! same logic to run against the memory store and a real Redis server.

use std::time::Duration;

use serde_json::json;

use crate::cache::{
    CacheError, CacheKeys, DocumentStatus, KeyTtl, Map, SetMode, SetOptions, StoreClient, Value,
};

fn map(json: serde_json::Value) -> Map {
    match Value::from(json) {
        Value::Map(map) => map,
        _ => panic!("expected an object"),
    }
}

// ============================================================================
// Shared Test Functions
// These are called by both the memory and Redis test implementations
// ============================================================================

pub async fn test_value_roundtrip(client: &StoreClient) {
    let values = [
        Value::from("plain text"),
        Value::Int(-42),
        Value::Float(2.5),
        Value::Bool(true),
        Value::from(json!({"nested": {"list": [1, "two", null]}})),
        Value::Bytes(vec![0, 159, 146, 150]),
        Value::List(vec![Value::Bytes(b"raw".to_vec()), Value::Float(f64::INFINITY)]),
    ];

    for (i, value) in values.iter().enumerate() {
        let key = format!("roundtrip:{}", i);
        assert!(client.set(&key, value, SetOptions::default()).await.unwrap());
        assert_eq!(client.get(&key).await.unwrap().as_ref(), Some(value), "value #{}", i);
    }
    assert_eq!(client.get("roundtrip:missing").await.unwrap(), None);
}

pub async fn test_conditional_writes(client: &StoreClient) {
    let absent = SetOptions::default().mode(SetMode::IfAbsent);
    let present = SetOptions::default().mode(SetMode::IfPresent);

    assert!(!client.set("cond", &Value::from("x"), present).await.unwrap());
    assert!(client.set("cond", &Value::from("a"), absent).await.unwrap());
    assert!(!client.set("cond", &Value::from("b"), absent).await.unwrap());
    assert!(client.set("cond", &Value::from("c"), present).await.unwrap());
    assert_eq!(client.get("cond").await.unwrap(), Some(Value::from("c")));
}

pub async fn test_expiry(client: &StoreClient) {
    client
        .set("ttl:short", &Value::from(1), SetOptions::with_ttl(Duration::from_secs(60)))
        .await
        .unwrap();
    client
        .set("ttl:forever", &Value::from(1), SetOptions::default())
        .await
        .unwrap();

    let ttl = client.ttl("ttl:short").await.unwrap();
    assert!(matches!(ttl, KeyTtl::Expires(_)));
    assert!((1..=60).contains(&ttl.as_secs()));
    assert_eq!(client.ttl("ttl:forever").await.unwrap().as_secs(), -1);
    assert_eq!(client.ttl("ttl:none").await.unwrap().as_secs(), -2);

    assert!(client.expire("ttl:forever", Duration::from_millis(100)).await.unwrap());
    assert!(!client.expire("ttl:none", Duration::from_secs(5)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(client.exists(&["ttl:forever", "ttl:short"]).await.unwrap(), 1);
}

pub async fn test_out_of_range_ttl_is_soft(client: &StoreClient) {
    let forever = Duration::from_secs(u64::MAX);
    assert!(!client.set("ttl:huge", &Value::from("v"), SetOptions::with_ttl(forever)).await.unwrap());
    assert_eq!(client.get("ttl:huge").await.unwrap(), None);
    assert!(!client.cache_set("ttl:huge", &Value::from("v"), Some(forever)).await.unwrap());

    client.set("ttl:kept", &Value::from("v"), SetOptions::default()).await.unwrap();
    assert!(!client.expire("ttl:kept", forever).await.unwrap());
    assert_eq!(client.ttl("ttl:kept").await.unwrap(), KeyTtl::Persistent);
}

pub async fn test_delete_and_exists(client: &StoreClient) {
    for key in ["del:a", "del:b"] {
        client.set(key, &Value::from("v"), SetOptions::default()).await.unwrap();
    }
    assert_eq!(client.exists(&["del:a", "del:b", "del:c"]).await.unwrap(), 2);
    assert_eq!(client.delete(&["del:a", "del:c"]).await.unwrap(), 1);
    assert_eq!(client.exists(&["del:a", "del:b"]).await.unwrap(), 1);
    assert_eq!(client.delete(&[]).await.unwrap(), 0);
}

pub async fn test_counters(client: &StoreClient) {
    assert_eq!(client.incr("counter", 1).await.unwrap(), 1);
    assert_eq!(client.incr("counter", 5).await.unwrap(), 6);
    assert_eq!(client.decr("counter", 10).await.unwrap(), -4);

    // Integers written through the codec stay usable as counters
    client.set("counter:set", &Value::Int(10), SetOptions::default()).await.unwrap();
    assert_eq!(client.incr("counter:set", 1).await.unwrap(), 11);
    assert_eq!(client.get("counter:set").await.unwrap(), Some(Value::Int(11)));

    client.set("counter:text", &Value::from("abc"), SetOptions::default()).await.unwrap();
    assert!(matches!(
        client.incr("counter:text", 1).await,
        Err(CacheError::NotInteger(_))
    ));
}

pub async fn test_hash_operations(client: &StoreClient) {
    let fields = map(json!({"name": "invoice.pdf", "pages": 3}));
    assert_eq!(client.hash_set("hash", &fields).await.unwrap(), 2);
    assert_eq!(client.hash_set("hash", &map(json!({"pages": 4}))).await.unwrap(), 0);

    assert_eq!(client.hash_get("hash", "pages").await.unwrap(), Some(Value::Int(4)));
    assert_eq!(client.hash_get("hash", "missing").await.unwrap(), None);
    assert_eq!(
        client.hash_get_all("hash").await.unwrap(),
        map(json!({"name": "invoice.pdf", "pages": 4}))
    );

    assert_eq!(client.hash_delete("hash", &["name", "nope"]).await.unwrap(), 1);
    assert_eq!(client.hash_delete("hash", &["pages"]).await.unwrap(), 1);
    assert_eq!(client.exists(&["hash"]).await.unwrap(), 0);
    assert!(client.hash_get_all("hash").await.unwrap().is_empty());
}

pub async fn test_list_operations(client: &StoreClient) {
    client.list_push_right("list", &[Value::from("b"), Value::from("c")]).await.unwrap();
    assert_eq!(client.list_push_left("list", &[Value::from("a")]).await.unwrap(), 3);

    assert_eq!(
        client.list_range("list", 0, -1).await.unwrap(),
        vec![Value::from("a"), Value::from("b"), Value::from("c")]
    );
    assert_eq!(client.list_range("list", -2, -1).await.unwrap().len(), 2);
    assert!(client.list_range("list", 5, 10).await.unwrap().is_empty());

    assert_eq!(client.list_pop_right("list").await.unwrap(), Some(Value::from("c")));
    assert_eq!(client.list_pop_left("list").await.unwrap(), Some(Value::from("a")));
    assert_eq!(client.list_len("list").await.unwrap(), 1);
    assert_eq!(client.list_pop_left("empty").await.unwrap(), None);
}

pub async fn test_set_operations(client: &StoreClient) {
    let members = [Value::from("ocr"), Value::from("tables"), Value::from("ocr")];
    assert_eq!(client.set_add("features", &members).await.unwrap(), 2);
    assert_eq!(client.set_add("features", &[Value::from("ocr")]).await.unwrap(), 0);

    let mut found: Vec<String> = client
        .set_members("features")
        .await
        .unwrap()
        .into_iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    found.sort();
    assert_eq!(found, vec!["ocr", "tables"]);

    assert!(client.set_is_member("features", &Value::from("tables")).await.unwrap());
    assert!(!client.set_is_member("features", &Value::from("forms")).await.unwrap());
}

pub async fn test_wrong_type_is_soft(client: &StoreClient) {
    client.set("scalar", &Value::from("v"), SetOptions::default()).await.unwrap();

    assert_eq!(client.hash_get_all("scalar").await.unwrap(), Map::new());
    assert_eq!(client.list_len("scalar").await.unwrap(), 0);
    assert_eq!(client.list_push_right("scalar", &[Value::Int(1)]).await.unwrap(), 0);
    assert!(!client.set_is_member("scalar", &Value::from("v")).await.unwrap());
    assert_eq!(client.get("scalar").await.unwrap(), Some(Value::from("v")));
}

pub async fn test_pattern_delete(client: &StoreClient) {
    for id in ["1", "2", "3"] {
        client
            .cache_document_result(id, &Value::from(json!({"id": id})), None)
            .await
            .unwrap();
    }
    client
        .create_session("keep", "user", Map::new(), None)
        .await
        .unwrap();

    let mut keys = client.scan_keys("doc_result:*").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["doc_result:1", "doc_result:2", "doc_result:3"]);

    let pattern = CacheKeys::pattern(CacheKeys::doc_result);
    assert_eq!(client.cache_delete(&pattern).await.unwrap(), 3);
    assert_eq!(client.cache_delete(&pattern).await.unwrap(), 0);
    assert!(client.get_session("keep").await.unwrap().is_some());
}

pub async fn test_domain_workflow(client: &StoreClient) {
    client
        .create_session("sess", "user-1", map(json!({"step": 1})), None)
        .await
        .unwrap();
    assert!(client.update_session("sess", map(json!({"step": 2})), false).await.unwrap());
    let session = client.get_session("sess").await.unwrap().unwrap();
    assert_eq!(session.data.get("step"), Some(&Value::Int(2)));

    let job = Value::from(json!({"document_id": "doc-9"}));
    client.enqueue("analysis", &job).await.unwrap();
    assert_eq!(client.queue_length("analysis").await.unwrap(), 1);
    assert_eq!(client.peek_queue("analysis", 1).await.unwrap(), vec![job.clone()]);
    assert_eq!(client.dequeue("analysis").await.unwrap(), Some(job));

    client
        .set_document_status("doc-9", &DocumentStatus::processing(50, "Extracting tables"))
        .await
        .unwrap();
    assert_eq!(
        client.document_status("doc-9").await.unwrap().unwrap().progress,
        Some(50)
    );

    let window = Duration::from_secs(30);
    let decisions = [
        client.rate_limit_check("10.1.1.1", 2, window).await,
        client.rate_limit_check("10.1.1.1", 2, window).await,
        client.rate_limit_check("10.1.1.1", 2, window).await,
    ];
    assert!(decisions[0].allowed && decisions[1].allowed);
    assert!(!decisions[2].allowed);
    assert!((1..=30).contains(&decisions[2].retry_after));
}

pub async fn test_server_stats(client: &StoreClient) {
    client.get("stats:miss").await.unwrap();
    let info = client.server_info().await.unwrap().expect("server info");
    assert!(!info.version.is_empty());

    client.set("stats:key", &Value::Int(1), SetOptions::default()).await.unwrap();
    assert!(client.flush_db().await.unwrap());
    assert_eq!(client.exists(&["stats:key"]).await.unwrap(), 0);
}

// ============================================================================
// Memory store
// ============================================================================

mod memory_tests {
    use crate::tests::harness::memory_client;

    macro_rules! memory_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let client = memory_client();
                super::$name(&client).await;
            }
        };
    }

    memory_test!(test_value_roundtrip);
    memory_test!(test_conditional_writes);
    memory_test!(test_expiry);
    memory_test!(test_out_of_range_ttl_is_soft);
    memory_test!(test_delete_and_exists);
    memory_test!(test_counters);
    memory_test!(test_hash_operations);
    memory_test!(test_list_operations);
    memory_test!(test_set_operations);
    memory_test!(test_wrong_type_is_soft);
    memory_test!(test_pattern_delete);
    memory_test!(test_domain_workflow);
    memory_test!(test_server_stats);
}

// ============================================================================
// Redis (testcontainers)
// ============================================================================

#[cfg(feature = "redis")]
mod redis_tests {
    use crate::tests::harness::redis::{create_redis_container, redis_client};

    macro_rules! redis_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let (url, _container) = create_redis_container().await;
                let client = redis_client(&url, "").await;
                super::$name(&client).await;
                client.disconnect().await;
            }
        };
    }

    redis_test!(test_value_roundtrip);
    redis_test!(test_conditional_writes);
    redis_test!(test_expiry);
    redis_test!(test_out_of_range_ttl_is_soft);
    redis_test!(test_delete_and_exists);
    redis_test!(test_counters);
    redis_test!(test_hash_operations);
    redis_test!(test_list_operations);
    redis_test!(test_set_operations);
    redis_test!(test_wrong_type_is_soft);
    redis_test!(test_pattern_delete);
    redis_test!(test_domain_workflow);
    redis_test!(test_server_stats);

    #[tokio::test]
    #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
    async fn test_key_prefix_is_transparent() {
        let (url, _container) = create_redis_container().await;
        let tenant_a = redis_client(&url, "tenant_a:").await;
        let tenant_b = redis_client(&url, "tenant_b:").await;

        tenant_a
            .cache_set("shared", &crate::cache::Value::from("a"), None)
            .await
            .unwrap();
        assert_eq!(tenant_b.get("shared").await.unwrap(), None);
        assert_eq!(tenant_a.scan_keys("*").await.unwrap(), vec!["shared"]);
        assert_eq!(tenant_b.cache_delete("*").await.unwrap(), 0);
        assert!(tenant_a.get("shared").await.unwrap().is_some());

        // Flushing one tenant leaves the other's keys in place
        tenant_b
            .cache_set("own", &crate::cache::Value::from("b"), None)
            .await
            .unwrap();
        assert!(tenant_b.flush_db().await.unwrap());
        assert_eq!(tenant_b.get("own").await.unwrap(), None);
        assert!(tenant_a.get("shared").await.unwrap().is_some());
    }
}
