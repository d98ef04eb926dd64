pub mod categories;
pub mod common;
pub mod config;
pub mod drain;
pub mod pending;
pub mod submit;
pub mod watch;
