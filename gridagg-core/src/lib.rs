pub mod array;
pub mod cache;
pub mod config;
pub mod coordinate;
pub mod engine;
pub mod executor;
pub mod geometry;
pub mod grid;
pub mod mask;
pub mod metadata;
pub mod plan;
pub mod python;
pub mod request;
pub mod stats;
pub mod temporal;

pub mod errors;
