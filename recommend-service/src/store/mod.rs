//! Read-side store traits the engine depends on.
//!
//! Catalog and interaction persistence live outside the core; the engine only
//! consumes query results through these traits (and writes nothing except
//! vectors produced by the vectorization pipeline). In-memory implementations
//! for tests and the maintenance binary live in [`memory`].

pub mod memory;

use crate::models::{Interaction, ItemRecord, ItemVectors, SwipeAction};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Vector coverage counters, for status reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VectorCoverage {
    pub total: usize,
    pub with_image: usize,
    pub with_text: usize,
    pub with_combined: usize,
    pub with_all: usize,
}

/// Read-only view over catalog items, plus the single write path for
/// job-produced vectors.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn item(&self, item_id: Uuid) -> Result<Option<ItemRecord>>;

    async fn items(&self, ids: &[Uuid]) -> Result<Vec<ItemRecord>>;

    /// Items carrying a combined vector, optionally filtered by category and
    /// brand; the pool for brute-force scans and the cold-start fallback.
    async fn vectorized_items(
        &self,
        category: Option<&str>,
        brand_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ItemRecord>>;

    /// Unswiped browsing pool for content scoring; no vector requirement.
    async fn candidates(
        &self,
        exclude: &HashSet<Uuid>,
        category: Option<&str>,
        brand_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ItemRecord>>;

    /// Ids of items missing at least one of the three vectors.
    async fn items_missing_vectors(&self) -> Result<Vec<Uuid>>;

    /// Persist vectors produced by the vectorization pipeline.
    async fn store_vectors(&self, item_id: Uuid, vectors: ItemVectors) -> Result<()>;

    async fn item_count(&self) -> Result<usize>;

    async fn vector_coverage(&self) -> Result<VectorCoverage>;
}

/// Read-only view over users' swipe history.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Whether the user id is known at all. A known user with zero
    /// interactions is a valid cold-start case, not an error.
    async fn user_exists(&self, user_id: Uuid) -> Result<bool>;

    /// The user's interactions, most recent first.
    async fn recent_interactions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Interaction>>;

    /// The user's interactions of one action, most recent first.
    async fn recent_by_action(
        &self,
        user_id: Uuid,
        action: SwipeAction,
        limit: usize,
    ) -> Result<Vec<Interaction>>;

    /// Every item the user hit with the given action.
    async fn item_ids_by_action(&self, user_id: Uuid, action: SwipeAction) -> Result<HashSet<Uuid>>;

    /// Every item the user has swiped either way.
    async fn swiped_item_ids(&self, user_id: Uuid) -> Result<HashSet<Uuid>>;

    /// All users with at least one like; the collaborative candidate pool.
    async fn users_with_likes(&self) -> Result<Vec<Uuid>>;

    /// (total, liked) interaction counts for a user.
    async fn interaction_counts(&self, user_id: Uuid) -> Result<(usize, usize)>;
}
