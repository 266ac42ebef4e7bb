#![allow(clippy::collapsible_if)]
pub mod auth;
pub mod background;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
