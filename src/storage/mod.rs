//! Storage primitives (§4.2, §2 Storage primitives).
//!
//! This module provides the low-level building blocks every other
//! subsystem persists through: atomic JSON writes, append-only JSONL logs,
//! recursive directory creation, and safe path joining. Nothing here knows
//! about domains, levels, or hashes — those live in [`crate::state`],
//! [`crate::artifacts`], and [`crate::runs`].

mod atomic;
mod jsonl;
mod traits;

pub use atomic::{ensure_dir, read_json_or_default, safe_join, write_json_atomic};
pub use jsonl::{append_jsonl_line, read_jsonl_lines};
pub use traits::StorageError;
