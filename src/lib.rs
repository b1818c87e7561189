//! Segmented file storage over OpenStack Swift.
//!
//! [`driver::Driver`] exposes a small filesystem API (whole-object reads and
//! writes, offset writes, stat, list, move, recursive delete) on top of an
//! [`store::ObjectStore`]. Large and resumable writes are stored as dynamic
//! large objects: a manifest plus fixed-size segments.

pub mod config;
pub mod driver;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod store;
