pub mod config;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use logic::{
    BranchDiffer, BranchOperations, DiffQueryFilters, FileDiffReport, FileDiffer, MergeCheck,
    MergeEngine, MergeReport, Pagination, RepositoryDiffClient,
};
pub use model::*;
pub use store::{GraphStore, MemoryGraphStore};

/// One-time process setup for binaries and integration tests: `.env`
/// loading plus env-filtered logging.
pub fn init() {
    dotenvy::dotenv().ok();
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
