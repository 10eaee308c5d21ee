//! Lotsync CLI - Command-line interface for the lotsync inventory mirror
//!
//! This crate provides the CLI application that ties together all lotsync components.

pub mod config;

pub use config::{Command, Config, QueryArgs, SyncAction};
