//! Report module - console summary and file exports

pub mod export;
pub mod summary;

pub use export::*;
pub use summary::*;
