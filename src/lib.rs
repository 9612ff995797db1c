//! Region lifecycle and persistence scheduling for a 2D tile world.
//!
//! The world is partitioned into fixed-size rectangular regions, each storing a grid
//! of slices (tiles, walls, light and optional tile entities). Regions are loaded from
//! and saved to durable storage on demand, and a region that has never been populated
//! is generated exactly once. Structures placed during generation may overflow into a
//! neighboring region before that neighbor exists in memory; the overflow is queued on
//! an in-memory placeholder and replayed once the neighbor is generated.
//!
//! The [`storage::PersistenceScheduler`] is the entry point: it enforces single-flight
//! load and save semantics per region, runs tasks on a bounded worker pool and drains
//! the deferred queues after generation.

pub mod config;

pub mod serde;

pub mod slice;
pub mod region;
pub mod directory;
pub mod r#gen;
pub mod storage;
