//! API handlers grouped by resource.

mod cache;
mod catalog;
mod health;
mod search;

pub use cache::*;
pub use catalog::*;
pub use health::*;
pub use search::*;
