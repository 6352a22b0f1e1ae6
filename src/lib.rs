pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod pipeline;
pub mod policy;
pub mod raster;
pub mod report;
pub mod rewrite;
pub mod tolerance;
pub mod util;
pub mod workspace;
