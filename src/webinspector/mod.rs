// Jackson Coxson
//! The Web Inspector protocol core (C9 device-side proxy, C10 host-side
//! client), sharing one wire schema ([`message`]): a 4-byte big-endian
//! length prefix, then a binary property list dictionary with
//! `__selector`/`__argument` keys (spec.md §6).

pub mod client;
pub mod message;
pub mod proxy;

pub use client::{FramedSocket, WebInspectorClient};
pub use message::{InspectorMessage, MessageKey};
