mod common;
mod purge;
mod recorder;

pub use purge::SqlitePurgeRepo;
pub use recorder::SqliteRecorderRepo;
