//! Storage backend implementations
//!
//! In-memory backends stand in for the shared cache and the durable
//! store in tests and single-process deployments; the sled backend
//! gives the durable store an embedded on-disk option.

pub mod memory_store;
pub mod sled_store;
