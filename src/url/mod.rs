//! URL normalization and host extraction (§4.1).
//!
//! Normalization is the sink's single point of truth for URL identity:
//! every URL-bearing field on an incoming request is converted to its
//! canonical normalized form immediately, so the rest of the system never
//! deals with raw strings (§9 Design Notes).

mod domain;
mod normalize;

pub use domain::{extract_host, extract_host_str};
pub use normalize::{extension, normalize};
