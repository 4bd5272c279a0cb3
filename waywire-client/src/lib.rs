//! Interface for interacting with a Wayland-like display server, as a client
//!
//! This crate provides the typed client API on top of [`waywire_backend`]: the [`Connection`],
//! the [`Proxy`] trait implemented by every interface type, and the three core interfaces
//! (`wl_display`, `wl_registry` and `wl_callback`) in the [`protocol`] module. Other interfaces are
//! produced by an external stub generator, following the same pattern.
//!
//! ## Getting started
//!
//! ```no_run
//! use waywire_client::{protocol::wl_registry, Connection};
//!
//! let conn = Connection::connect_to_env().unwrap();
//! let _registry = conn
//!     .display()
//!     .get_registry(|_, _registry, event| {
//!         if let wl_registry::Event::Global { name, interface, version } = event {
//!             println!("[{name}] {interface} (v{version})");
//!         }
//!     })
//!     .unwrap();
//! conn.roundtrip().unwrap();
//! ```
//!
//! Event handlers are plain closures attached to each object. They run from within
//! [`Connection::read()`], [`Connection::dispatch_pending()`] or [`Connection::roundtrip()`],
//! on the thread that called them.
//!
//! Objects created by the server (through a new id argument of an event) start without any
//! handler: their events are logged and dropped until one is attached with
//! [`Connection::assign()`].
//!
//! ## Logging
//!
//! This crate and its backend log through the `log` crate. Setting `WAYLAND_DEBUG=1` prints
//! every message exchanged with the server to stderr.

#![warn(missing_docs, missing_debug_implementations)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use waywire_backend::{
    client::{Backend, ObjectData},
    protocol::{Argument, Interface, Message},
};

pub use waywire_backend as backend;
pub use waywire_backend::client::{InvalidId, ObjectId, WaylandError};
pub use waywire_backend::protocol::WEnum;

mod conn;
pub mod globals;
pub mod protocol;

pub use conn::{ConnectError, Connection};

/// Trait representing a Wayland interface
pub trait Proxy: Clone + std::fmt::Debug + Sized + Send + Sync + 'static {
    /// The request enum for this interface
    type Request;
    /// The event enum for this interface
    type Event: Send;

    /// The interface description
    fn interface() -> &'static Interface;

    /// The ID of this object
    fn id(&self) -> ObjectId;

    /// The version of this object
    fn version(&self) -> u32;

    /// Access the connection this object belongs to
    ///
    /// Returns `None` if the connection was dropped.
    fn connection(&self) -> Option<Connection>;

    /// Checks if the Wayland object associated with this proxy is still alive
    fn is_alive(&self) -> bool {
        self.connection().map(|conn| conn.object_info(self.id()).is_ok()).unwrap_or(false)
    }

    /// Create an object proxy from its ID
    ///
    /// Returns an error this the provided object ID does not correspond to
    /// the `Self` interface.
    ///
    /// **Note:** This method is mostly meant as an implementation detail to be
    /// used by code generated by the stub generator.
    fn from_id(conn: &Connection, id: ObjectId) -> Result<Self, InvalidId>;

    /// Parse a event for this object
    ///
    /// **Note:** This method is mostly meant as an implementation detail to be
    /// used by code generated by the stub generator.
    fn parse_event(
        conn: &Connection,
        msg: Message<ObjectId>,
    ) -> Result<(Self, Self::Event), DispatchError>;

    /// Serialize a request for this object
    ///
    /// Returns the message, and the interface and version of the object it creates if this is a
    /// generic constructor.
    ///
    /// **Note:** This method is mostly meant as an implementation detail to be
    /// used by code generated by the stub generator.
    #[allow(clippy::type_complexity)]
    fn write_request(
        &self,
        conn: &Connection,
        req: Self::Request,
    ) -> Result<(Message<ObjectId>, Option<(&'static Interface, u32)>), InvalidId>;

    /// Send a request for this object
    ///
    /// It is an error to use this function on requests that create objects; use
    /// [`send_constructor()`](Proxy::send_constructor) for such requests.
    fn send_request(&self, req: Self::Request) -> Result<(), InvalidId> {
        let conn = self.connection().ok_or(InvalidId)?;
        let id = conn.send_request(self, req, None)?;
        debug_assert!(id.is_null());
        Ok(())
    }

    /// Send a request for this object that creates another object
    ///
    /// It is an error to use this function on requests that do not create objects; use
    /// [`send_request()`](Proxy::send_request) for such requests.
    fn send_constructor<I: Proxy>(
        &self,
        req: Self::Request,
        data: Arc<dyn ObjectData>,
    ) -> Result<I, InvalidId> {
        let conn = self.connection().ok_or(InvalidId)?;
        let id = conn.send_request(self, req, Some(data))?;
        I::from_id(&conn, id)
    }
}

/// An error generated if an event could not be parsed into the typed event of its object
#[derive(Debug)]
pub enum DispatchError {
    /// The received message does not match the specification for the object's interface.
    BadMessage {
        /// The id of the target object
        sender_id: ObjectId,
        /// The interface of the target object
        interface: &'static str,
        /// The opcode number
        opcode: u16,
    },
}

impl DispatchError {
    /// The error for a message that does not match the interface of `I`
    pub fn bad_message<I: Proxy>(msg: &Message<ObjectId>) -> Self {
        Self::BadMessage {
            sender_id: msg.sender_id.clone(),
            interface: I::interface().name,
            opcode: msg.opcode,
        }
    }
}

impl std::error::Error for DispatchError {}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        match self {
            Self::BadMessage { sender_id, interface, opcode } => {
                write!(f, "Bad message for object {sender_id} of interface {interface} on opcode {opcode}")
            }
        }
    }
}

type Handler<I> = Box<dyn FnMut(&Connection, I, <I as Proxy>::Event) + Send>;

/// The [`ObjectData`] of objects created through the typed API
///
/// It parses the events into the typed events of `I` and forwards them to the handler closure.
/// Objects this event creates are given [`UnassignedData`] until a handler is attached to them.
///
/// The handler may dispatch again (for example with [`Connection::roundtrip()`]). Events for this
/// same object received meanwhile are queued, and given to the handler once it returns.
pub struct ProxyData<I: Proxy> {
    pending: Mutex<VecDeque<(I, I::Event)>>,
    handler: Mutex<Handler<I>>,
}

impl<I: Proxy> ProxyData<I> {
    /// Wrap a handler closure
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: FnMut(&Connection, I, I::Event) + Send + 'static,
    {
        Arc::new(Self { pending: Mutex::new(VecDeque::new()), handler: Mutex::new(Box::new(handler)) })
    }

    /// Replace the handler closure
    pub fn set_handler<F>(&self, handler: F)
    where
        F: FnMut(&Connection, I, I::Event) + Send + 'static,
    {
        *self.handler.lock().unwrap() = Box::new(handler);
    }

    fn deliver(&self, conn: &Connection, proxy: I, event: I::Event) {
        self.pending.lock().unwrap().push_back((proxy, event));
        loop {
            // the handler is already running, it will process the queue
            let Ok(mut handler) = self.handler.try_lock() else {
                return;
            };
            loop {
                let next = self.pending.lock().unwrap().pop_front();
                let Some((proxy, event)) = next else {
                    break;
                };
                (*handler)(conn, proxy, event);
            }
            drop(handler);
            // pushed by another thread before the handler was released
            if self.pending.lock().unwrap().is_empty() {
                return;
            }
        }
    }
}

impl<I: Proxy> std::fmt::Debug for ProxyData<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyData").field("interface", &I::interface().name).finish_non_exhaustive()
    }
}

impl<I: Proxy> ObjectData for ProxyData<I> {
    fn event(self: Arc<Self>, backend: &Backend, msg: Message<ObjectId>) -> Option<Arc<dyn ObjectData>> {
        let conn = Connection::from_backend(backend.clone());
        let creates_child = msg.args.iter().any(|arg| matches!(arg, Argument::NewId(_)));
        match I::parse_event(&conn, msg) {
            Ok((proxy, event)) => self.deliver(&conn, proxy, event),
            Err(e) => log::error!("Dropping event: {e}"),
        }
        if creates_child {
            Some(Arc::new(UnassignedData))
        } else {
            None
        }
    }

    fn destroyed(&self, object_id: ObjectId) {
        log::debug!("Object {object_id} destroyed.");
    }

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// The [`ObjectData`] of objects that have no handler
///
/// Their events are logged and discarded.
#[derive(Debug)]
pub struct UnassignedData;

impl ObjectData for UnassignedData {
    fn event(self: Arc<Self>, _: &Backend, msg: Message<ObjectId>) -> Option<Arc<dyn ObjectData>> {
        log::warn!("Discarding event {}.{}: no handler assigned.", msg.sender_id, msg.opcode);
        if msg.args.iter().any(|arg| matches!(arg, Argument::NewId(_))) {
            Some(self)
        } else {
            None
        }
    }

    fn destroyed(&self, _object_id: ObjectId) {}

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
