//! Concrete implementors of the backspin-core collaborator traits: an
//! in-memory session store with live subscriptions, the null and relay
//! transports, a local catalog+player, and simple moderation pieces.

mod catalog;
mod memory;
mod moderation;
mod transports;
mod util;

pub use catalog::*;
pub use memory::*;
pub use moderation::*;
pub use transports::*;
pub use util::*;
