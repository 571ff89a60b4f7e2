/// Key layout shared with the other services reading the same store.
pub struct CacheKeys;

impl CacheKeys {
    /// Session record: session:{session_id}
    pub fn session(session_id: &str) -> String {
        format!("session:{}", session_id)
    }

    /// FIFO work queue: queue:{name}
    pub fn queue(name: &str) -> String {
        format!("queue:{}", name)
    }

    /// Fixed-window request counter: rate_limit:{identifier}
    pub fn rate_limit(identifier: &str) -> String {
        format!("rate_limit:{}", identifier)
    }

    /// Processing status of an uploaded document: doc_status:{document_id}
    pub fn doc_status(document_id: &str) -> String {
        format!("doc_status:{}", document_id)
    }

    /// Analysis output of a processed document: doc_result:{document_id}
    pub fn doc_result(document_id: &str) -> String {
        format!("doc_result:{}", document_id)
    }

    /// Pattern matching every key of one kind, e.g. `pattern(CacheKeys::session)`
    /// gives `session:*`.
    pub fn pattern(key_fn: fn(&str) -> String) -> String {
        key_fn("*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(CacheKeys::session("abc"), "session:abc");
        assert_eq!(CacheKeys::queue("ocr"), "queue:ocr");
        assert_eq!(CacheKeys::rate_limit("10.0.0.1"), "rate_limit:10.0.0.1");
        assert_eq!(CacheKeys::doc_status("d1"), "doc_status:d1");
        assert_eq!(CacheKeys::doc_result("d1"), "doc_result:d1");
    }

    #[test]
    fn test_pattern() {
        assert_eq!(CacheKeys::pattern(CacheKeys::doc_result), "doc_result:*");
    }
}
