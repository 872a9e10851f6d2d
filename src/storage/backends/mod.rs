//! Storage backend implementations.
//!
//! - `MemoryBackend`: ordered in-memory storage; durability comes from
//!   snapshots taken by the store (requires `snapshot` feature)

mod memory;

pub use memory::MemoryBackend;
