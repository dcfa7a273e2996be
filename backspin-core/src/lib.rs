//! The backspin coordination engine: one DJ broadcasts a shared listening
//! session to many concurrent listeners over an eventually-consistent
//! session store, with presence, moderated chat, and playback sync.
//!
//! Everything external (the store, the broadcast transport, the catalog
//! and player, the moderation classifier) sits behind a trait and is
//! injected at construction, so multiple isolated coordinators can run
//! side by side in tests.

mod catalog;
mod chat;
mod config;
mod coordinator;
mod errors;
mod events;
mod model;
mod moderation;
mod presence;
mod store;
mod sync;
mod transport;

pub use catalog::*;
pub use chat::*;
pub use config::*;
pub use coordinator::*;
pub use errors::*;
pub use events::*;
pub use model::*;
pub use moderation::*;
pub use presence::*;
pub use store::*;
pub use sync::*;
pub use transport::*;
