#![deny(missing_docs)]

//! # table_forge
//!
//! **table_forge** builds large execution tables and interpolates their
//! columns without letting the working set grow with the table.  Three
//! pieces cooperate through one shared buffer pool:
//!
//! * **Pool manager**: the [`pool`](pool/index.html) module keeps fixed size
//!   classes of `u64` buffers, each class behind its own lock, with a ceiling
//!   on how many buffers a class may own.  Past the ceiling, checkouts fall
//!   back to plain allocations instead of blocking.
//! * **Streaming table builder**: [`TableBuilder`] fills a `height × width`
//!   table chunk by chunk from a row function, storing every chunk in a
//!   pooled buffer whose size depends on the chunk budget, never on the
//!   height.
//! * **Cache-aware interpolator**: [`Interpolator`] turns a column into
//!   polynomial coefficients over the canonical roots-of-unity domain with a
//!   blocked NTT, and falls back to direct Lagrange interpolation for lengths
//!   that are not powers of two.
//! * **Memory reporter**: [`report_memory_usage`] snapshots the process RSS
//!   and the pool counters and logs them through `tracing`.
//!
//! Arithmetic is over the 64-bit Goldilocks prime `2^64 - 2^32 + 1` unless a
//! different [`FieldConfig`] is supplied.  Tables can be committed to with a
//! BLAKE2b Merkle root over their chunks (see [`TableCommitment`]).
//!
//! ## Usage
//!
//! ```rust
//! use table_forge::{Engine, EngineConfig, PoolConfig};
//!
//! let pools = PoolConfig::from_classes(&[64, 1024], &[4, 4]).unwrap();
//! let engine = Engine::new(EngineConfig::with_pools(pools)).unwrap();
//!
//! // 256 rows of width 4, every entry of row i equal to i.
//! let table = engine.build_table(256, 4, |i| vec![i as u64; 4]).unwrap();
//! assert_eq!(table.get(100, 3), Some(100));
//!
//! let column = table.column(0).unwrap();
//! let poly = engine.interpolate_streaming(&column, 256).unwrap();
//! assert_eq!(poly.evaluate_at_domain_index(100).unwrap(), 100);
//!
//! drop(table);
//! assert_eq!(engine.report_memory_usage().checked_out(), 0);
//! ```

pub mod commit;
pub mod config;
pub mod domain;
pub mod engine;
mod error;
mod field;
pub mod interpolate;
mod polynomial;
pub mod pool;
pub mod report;
mod streaming;
pub mod table;

pub use commit::{verify_chunk_proof, ChunkProof, TableCommitment};
pub use config::{EngineConfig, FieldConfig, PoolConfig, SizeClassConfig};
pub use domain::Domain;
pub use engine::{init_memory_pools, memory_pools, Engine};
pub use error::{EngineError, Result, RowError};
pub use field::{Field, GOLDILOCKS_GENERATOR, GOLDILOCKS_MODULUS};
pub use interpolate::Interpolator;
pub use polynomial::Polynomial;
pub use pool::{Buffer, BufferId, BufferOrigin, PoolManager, PoolStats, PooledBuffer};
pub use report::{report_memory_usage, snapshot, MemorySnapshot};
pub use streaming::StreamingRows;
pub use table::{ChunkLayout, GenerationOrder, Table, TableBuilder};
