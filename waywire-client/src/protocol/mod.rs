//! The core interfaces of the protocol
//!
//! These three interfaces are written in the same shape as the code produced by the stub
//! generator for every other interface: a module per interface, containing the proxy type,
//! its `Request` and `Event` enums, its enums and the `*_SINCE` version constants.

pub use waywire_backend::core_interfaces::{
    WL_CALLBACK_INTERFACE, WL_DISPLAY_INTERFACE, WL_REGISTRY_INTERFACE,
};

pub mod wl_callback;
pub mod wl_display;
pub mod wl_registry;
