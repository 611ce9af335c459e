//! Flowcron Library
//!
//! Periodic flow scheduling over a shared job store: job lifecycle, the
//! due-job sweep, run history and the in-process execution engine.

use shadow_rs::shadow;
shadow!(build);

pub mod cli;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod flows;
pub mod logger;
pub mod schema;
pub mod state;

pub use state::AppState;

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}
