//! Public facade crate for `paperflow`.
//!
//! This crate intentionally contains no IO or backend-specific logic.
//! It re-exports the backend-agnostic types/traits from `paperflow-core`.

pub use paperflow_core::*;
