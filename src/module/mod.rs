// src/module/mod.rs
//! Module import support

pub mod cache;

pub use cache::{fingerprint, ImportCache, ModuleEntry};
