pub mod branch_ops;
pub mod diff;
pub mod files;
pub mod merge;
pub mod query;

pub use branch_ops::*;
pub use diff::*;
pub use files::*;
pub use merge::*;
pub use query::*;
