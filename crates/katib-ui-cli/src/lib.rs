//! # Katib UI Operator CLI
//!
//! Drives the Katib UI operator from the command line: one-shot rendering
//! against an in-memory host, applying to a cluster, and a JSON-lines
//! event loop.

pub mod commands;

pub use commands::*;
