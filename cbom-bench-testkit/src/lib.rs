//! Fixtures shared by cbom-bench integration tests and benches.
//!
//! - [`repos`]: repository and run-request fixtures, plus a scripted
//!   metadata provider
//! - [`producer`]: a scripted [`Producer`](cbom_bench::Producer) that records
//!   every instruction it sees
//! - [`results`]: helpers that play the worker side against a store

pub mod producer;
pub mod repos;
pub mod results;

pub use producer::*;
pub use repos::*;
pub use results::*;
