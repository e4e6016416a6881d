pub mod branch;
pub mod diff;
pub mod errors;
pub mod files;
pub mod graph;
pub mod schema;
pub mod timestamp;

pub use branch::*;
pub use diff::*;
pub use errors::*;
pub use files::*;
pub use graph::*;
pub use schema::*;
pub use timestamp::*;
