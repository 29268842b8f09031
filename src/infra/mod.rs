//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod manifest;
pub mod memory;
pub mod render;
pub mod telemetry;
