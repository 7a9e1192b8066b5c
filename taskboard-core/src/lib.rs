//! # taskboard-core — Board document model for the collaborative task board
//!
//! Everything here is pure: no I/O, no clocks, no randomness. Ids and tags
//! come from injected sources so the same inputs always produce the same
//! board.
//!
//! ## Modules
//!
//! - [`model`] — `Board`, `Column`, `Task`, invariant validation, seed board
//! - [`ops`] — the board transformations (add/delete/update/move)
//! - [`ids`] — id generators and the tag pool
//! - [`query`] — search filter and summary

pub mod error;
pub mod ids;
pub mod model;
pub mod ops;
pub mod query;

pub use error::BoardError;
pub use ids::{IdGenerator, SequentialIds, TagPool, UuidIds};
pub use model::{Board, Column, Priority, Task, TERMINAL_COLUMN};
pub use ops::TaskMove;
pub use query::BoardSummary;
