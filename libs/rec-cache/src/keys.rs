//! Unified cache key schema
//!
//! Every engine component must build keys through these generators so that
//! pattern invalidation stays consistent.
//! Key format: v{VERSION}:{entity}:{user_id}[:sub_key]

use uuid::Uuid;

/// Cache schema version - increment when changing key formats
pub const CACHE_VERSION: u32 = 1;

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Preference vectors for a user under one aggregation parameter set.
    /// Format: v1:pref:{user_id}:{params}
    pub fn preference(user_id: Uuid, params: &str) -> String {
        format!("v{}:pref:{}:{}", CACHE_VERSION, user_id, params)
    }

    /// Pattern for all preference keys of a user.
    pub fn preference_pattern(user_id: Uuid) -> String {
        format!("v{}:pref:{}:*", CACHE_VERSION, user_id)
    }

    /// Finished recommendation list for a user under one request parameter
    /// set. Format: v1:recs:{user_id}:{params}
    pub fn recommendations(user_id: Uuid, params: &str) -> String {
        format!("v{}:recs:{}:{}", CACHE_VERSION, user_id, params)
    }

    /// Pattern for all recommendation keys of a user.
    pub fn recommendations_pattern(user_id: Uuid) -> String {
        format!("v{}:recs:{}:*", CACHE_VERSION, user_id)
    }

    /// Pattern for every key belonging to a user, across entities.
    pub fn user_pattern(user_id: Uuid) -> String {
        format!("v{}:*:{}:*", CACHE_VERSION, user_id)
    }

    /// Extract entity type from a key.
    pub fn entity_type(key: &str) -> Option<&str> {
        // Format: v{N}:{entity}:...
        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() >= 2 {
            Some(parts[1])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_key() {
        let user_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let key = CacheKey::preference(user_id, "weighted:10:30");
        assert_eq!(
            key,
            "v1:pref:550e8400-e29b-41d4-a716-446655440000:weighted:10:30"
        );
    }

    #[test]
    fn test_recommendations_key() {
        let user_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let key = CacheKey::recommendations(user_id, "abc123");
        assert!(key.starts_with("v1:recs:"));
        assert!(key.contains(&user_id.to_string()));
    }

    #[test]
    fn test_entity_type() {
        assert_eq!(CacheKey::entity_type("v1:pref:123:x"), Some("pref"));
        assert_eq!(CacheKey::entity_type("v1:recs:123:y"), Some("recs"));
        assert_eq!(CacheKey::entity_type("invalid"), None);
    }
}
