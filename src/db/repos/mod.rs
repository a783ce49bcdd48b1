mod purge;
mod recorder;

pub use purge::*;
pub use recorder::*;
