//! API route handlers

pub mod health;
pub mod modules;
pub mod stats;
