//! qpmd is the rendezvous service of quacktor machines.
//!
//! Machines announce themselves with `hello` and publish named systems with `register`. The
//! registering connection stays open and carries periodic heartbeats, a system disappears from
//! qpmd as soon as that connection closes. Other machines `lookup` a system by name to learn how
//! to reach the machine hosting it.

pub mod client;
pub mod message;
pub mod server;

pub use client::QpmdClient;
pub use server::QpmdServer;

pub const DEFAULT_PORT: u16 = 7161;
