//! Marketplace Kernel Library
//!
//! This library exposes kernel internals for integration testing.
//! The main entry point for running the server is the `marketplace` binary.

pub mod config;
pub mod db;
pub mod error;
pub mod plugin;
pub mod routes;
pub mod state;
