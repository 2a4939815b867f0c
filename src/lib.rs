// src/lib.rs
pub mod config;
pub mod connectors;
pub mod core;
pub mod decision;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod types;
pub mod utils;
