//! The chat simulation built on `netlab-core`'s transport: a server, two
//! named clients, and the router/physical-layer bootstrap shared by all
//! four binaries.

pub mod chat;
pub mod cli;
pub mod error;
pub mod ui;
