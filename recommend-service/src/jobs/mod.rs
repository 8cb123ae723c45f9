// ============================================
// Background Jobs Module
// ============================================
//
// Asynchronous, idempotent pipelines that run off the request path:
// 1. Vectorization: (re)populate item embeddings and index entries
//
// Jobs are tracked by id; per-item failures never abort a batch.

pub mod vectorize;

pub use vectorize::{
    ItemFailure, JobPriority, JobRecord, JobStatus, VectorizationQueue,
};
