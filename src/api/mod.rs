//! Enumerations, validity tables and the event envelope.

mod events;
mod tables;
mod taxonomy;

pub use events::*;
pub use tables::*;
pub use taxonomy::*;
