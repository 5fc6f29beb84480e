// Engram Salience: Engine
// Everything with state or I/O: the store handle, typed configuration,
// the ranking/decay/graph logic and the embedding boundary.

pub mod config;
pub mod engram;
pub mod memory;
pub mod sessions;
