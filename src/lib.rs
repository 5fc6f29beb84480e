// Engram Salience: relevance ranking and memory salience for agent
// knowledge stores.
//
// Layout:
//   atoms/: pure types, named constants, the error enum (no I/O)
//   engine/: SQLite session store, configuration, the salience engine,
//           and the embedding-provider boundary
//
// The crate never installs a logger; hosts pick their own `log` backend.

pub mod atoms;
pub mod engine;

pub use atoms::engram_types;
pub use atoms::error::{EngineError, EngineResult, ValidationError};
pub use engine::config::SalienceConfig;
pub use engine::sessions::SessionStore;
