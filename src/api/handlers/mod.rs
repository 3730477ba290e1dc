//! API handlers for the session service.

pub mod auth;
pub mod health;
pub mod root;
