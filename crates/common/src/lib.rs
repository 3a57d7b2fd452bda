//! Small text utilities shared across relay crates.

pub mod text;
