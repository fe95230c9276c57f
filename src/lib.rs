//! auto-attach — watches the Downloads folder and opens the platform mail
//! client with matching files attached, exactly once per arrival.

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod materialize;
pub mod native_host;
pub mod orchestrator;
pub mod pipeline;
pub mod server;
pub mod stability;
pub mod tracker;
pub mod watch;
