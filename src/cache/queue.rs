//! FIFO work queues on lists: push at the tail, pop from the head.
//! A drained queue no longer exists in the store.

use super::{client::StoreClient, error::CacheResult, keys::CacheKeys, value::Value};

impl StoreClient {
    /// Append an item, returning the queue length after the push.
    pub async fn enqueue(&self, queue_name: &str, item: &Value) -> CacheResult<u64> {
        self.list_push_right(&CacheKeys::queue(queue_name), std::slice::from_ref(item))
            .await
    }

    /// Remove and return the oldest item.
    pub async fn dequeue(&self, queue_name: &str) -> CacheResult<Option<Value>> {
        self.list_pop_left(&CacheKeys::queue(queue_name)).await
    }

    pub async fn queue_length(&self, queue_name: &str) -> CacheResult<u64> {
        self.list_len(&CacheKeys::queue(queue_name)).await
    }

    /// The oldest `count` items, without removing them.
    pub async fn peek_queue(&self, queue_name: &str, count: usize) -> CacheResult<Vec<Value>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let stop = i64::try_from(count).unwrap_or(i64::MAX) - 1;
        self.list_range(&CacheKeys::queue(queue_name), 0, stop)
            .await
    }
}
