// src/core/mod.rs
pub mod engine;
pub mod history;
pub mod risk;
pub mod supervisor;
