//! Wellness Coach: exercise session controller plus diet and nutrition clients.

pub(crate) mod api;
pub mod backend;
pub mod capture;
pub mod config;
pub mod diet;
pub mod error;
pub mod nutrition;
pub mod session;
pub mod speech;
