//! Fire-and-forget operator notifications.

mod events;
mod handle;
mod sink;
mod writer;

pub use events::*;
pub use handle::*;
pub use sink::*;
pub use writer::*;
