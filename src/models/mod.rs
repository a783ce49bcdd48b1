mod entity;
mod events;
mod runs;
mod states;

pub use entity::*;
pub use events::*;
pub use runs::*;
pub use states::*;
