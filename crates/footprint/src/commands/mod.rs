//! CLI command implementations

pub mod fixture;
pub mod measure;
pub mod resources;
