mod purge;
mod recorder;

pub use purge::PostgresPurgeRepo;
pub use recorder::PostgresRecorderRepo;
