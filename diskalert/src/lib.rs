//! diskalert library - device resolution, probe loading and the event
//! pipeline behind the user-space agent.

pub mod config;
pub mod device;
pub mod events;
pub mod loader;
pub mod logging;
pub mod procscan;
pub mod recovery;
pub mod retention;
pub mod stats;
pub mod watcher;
