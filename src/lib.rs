//! dustbox - mock vendor cloud for robot-vacuum devices
//!
//! The core is the account/device/credential registry; the HTTP layer is
//! thin glue over it. All modules are exposed for testing purposes.

pub mod clock;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod registry;
pub mod settings;
pub mod store;
pub mod web;
