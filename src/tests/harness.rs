//! Test harness for building clients against each backend

use std::sync::Arc;

use crate::cache::{ClientOptions, MemoryConnector, StoreClient};

/// Client over a fresh in-memory store
pub fn memory_client() -> StoreClient {
    let connector = Arc::new(MemoryConnector::from_config(&Default::default()));
    StoreClient::new(connector, ClientOptions::default())
}

/// Redis test harness using testcontainers
#[cfg(feature = "redis")]
pub mod redis {
    use std::sync::Arc;

    use testcontainers_modules::{
        redis::Redis,
        testcontainers::{ContainerAsync, runners::AsyncRunner},
    };

    use crate::{
        cache::{ClientOptions, RedisConnector, StoreClient},
        config::RedisStoreConfig,
    };

    /// Start a Redis container and return the connection URL and container handle
    /// The container is kept alive as long as the returned handle is held
    pub async fn create_redis_container() -> (String, ContainerAsync<Redis>) {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get port");

        let url = format!("redis://{}:{}", host, port);

        (url, container)
    }

    /// Connected client over the container, with every key under `key_prefix`
    pub async fn redis_client(url: &str, key_prefix: &str) -> StoreClient {
        let config = RedisStoreConfig {
            url: url.to_string(),
            key_prefix: key_prefix.to_string(),
            ..Default::default()
        };
        let client = StoreClient::new(
            Arc::new(RedisConnector::new(config)),
            ClientOptions::default(),
        );
        client.connect().await.expect("Failed to connect to Redis");
        client
    }
}
