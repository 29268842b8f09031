//! Application layer: collaborator seams and error types.

pub mod content;
pub mod error;
pub mod render;
pub mod repos;
