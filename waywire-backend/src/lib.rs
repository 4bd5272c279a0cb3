//! Backend API for waywire crates
//!
//! This crate provides the low-level machinery of the client side of a Wayland-like display
//! protocol: the wire format ([`wire`]), the object-id table ([`map`]), the buffered socket and
//! the [`client::Backend`], which owns all of them and exposes the send path and the blocking
//! read-dispatch step.
//!
//! The backend does not know about any concrete interface besides the three core ones
//! (`wl_display`, `wl_registry` and `wl_callback`, see [`core_interfaces`]). Every other
//! interface is an opaque bag of opcode signatures, described by a static [`protocol::Interface`]
//! produced by an external stub generator.
//!
//! ## Logging
//!
//! Runtime messages (sent and dispatched messages, swallowed events, fatal errors) go through the
//! `log` crate. Setting the `WAYLAND_DEBUG` environment variable to `1` or `client` additionally
//! prints every message exchanged on the connection to stderr, in the same format as libwayland.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

/// Reexport of the `smallvec` crate, which is part of `waywire-backend`'s public API.
pub extern crate smallvec;

/// Helper macro for quickly making a [`Message`][crate::protocol::Message]
#[macro_export]
macro_rules! message {
    ($sender_id: expr, $opcode: expr, [$($args: expr),* $(,)?] $(,)?) => {
        $crate::protocol::Message {
            sender_id: $sender_id,
            opcode: $opcode,
            args: $crate::smallvec::smallvec![$($args),*],
        }
    }
}

pub mod client;
pub mod core_interfaces;
pub mod map;
pub mod protocol;
pub mod wire;

mod debug;
mod socket;
mod types;

pub use socket::{MAX_BYTES_IN, MAX_BYTES_OUT};
