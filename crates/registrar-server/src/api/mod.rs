//! HTTP API: client, peer and operational routes

pub mod apps;
pub mod ops;
pub mod peer;
pub mod route;
