//! Domain types shared by both polling primitives: status payloads, the
//! operator command vocabulary, per-session state machines, and the ports
//! through which backends are reached.

pub mod command;
pub mod health;
pub mod ports;
pub mod session;
pub mod status;
