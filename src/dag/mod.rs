// src/dag/mod.rs

//! Dependency graph helpers for task groups.
//!
//! Tasks point at their parents through `parent_ids`; the engine needs the
//! opposite direction (children) and cycle checks. Both are derived here.

pub mod graph;

pub use graph::{TaskGraph, children_index};
