//! Pipeline module - loading, splitting and feature preparation

pub mod boxcox;
pub mod loader;
pub mod preprocess;
pub mod schema;
pub mod split;

pub use boxcox::*;
pub use loader::*;
pub use preprocess::*;
pub use schema::*;
pub use split::*;
