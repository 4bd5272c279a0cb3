//! global registry object
//!
//! The singleton global registry object. The server has a number of global objects that are
//! available to all clients. These objects typically represent an actual object in the server
//! (for example, an input device) or they are singleton objects that provide extension
//! functionality.
//!
//! When a client creates a registry object, the registry object will emit a global event for
//! each global currently in the registry. Globals come and go as a result of device or monitor
//! hotplugs, reconfiguration or other events, and the registry will send out global and
//! global_remove events to keep the client up to date with the changes. To mark the end of the
//! initial burst of events, the client can use the `wl_display.sync` request immediately after
//! calling `wl_display.get_registry`.
//!
//! A client can bind to a global object by using the bind request. This creates a client-side
//! handle that lets the object emit events to the client and lets the client invoke requests on
//! the object.

use std::ffi::CString;

use waywire_backend::{
    client::WeakBackend,
    message,
    protocol::{same_interface, Argument, Interface, Message},
};

use crate::{Connection, DispatchError, InvalidId, ObjectId, Proxy, ProxyData};

/// The minimal object version supporting this request
pub const REQ_BIND_SINCE: u32 = 1;
/// The minimal object version supporting this event
pub const EVT_GLOBAL_SINCE: u32 = 1;
/// The minimal object version supporting this event
pub const EVT_GLOBAL_REMOVE_SINCE: u32 = 1;

/// Requests of `wl_registry`
#[derive(Debug)]
#[non_exhaustive]
pub enum Request {
    /// bind an object to the display
    ///
    /// Binds a new, client-created object to the server using the specified name as the
    /// identifier.
    Bind {
        /// unique numeric name of the object
        name: u32,
        /// interface and version of the object to create
        id: (&'static Interface, u32),
    },
}

/// Events of `wl_registry`
#[derive(Debug)]
#[non_exhaustive]
pub enum Event {
    /// announce global object
    ///
    /// Notify the client of global objects. The event notifies the client that a global object
    /// with the given name is now available, and it implements the given version of the given
    /// interface.
    Global {
        /// numeric name of the global object
        name: u32,
        /// interface implemented by the object
        interface: String,
        /// interface version
        version: u32,
    },
    /// announce removal of global object
    ///
    /// Notify the client of removed global objects. Binding a removed global is an error,
    /// objects already bound to it stay usable until destroyed.
    GlobalRemove {
        /// numeric name of the global object
        name: u32,
    },
}

/// global registry object
#[derive(Debug, Clone)]
pub struct WlRegistry {
    id: ObjectId,
    version: u32,
    backend: WeakBackend,
}

impl PartialEq for WlRegistry {
    fn eq(&self, other: &WlRegistry) -> bool {
        self.id == other.id
    }
}

impl Eq for WlRegistry {}

impl Proxy for WlRegistry {
    type Request = Request;
    type Event = Event;

    #[inline]
    fn interface() -> &'static Interface {
        &super::WL_REGISTRY_INTERFACE
    }

    #[inline]
    fn id(&self) -> ObjectId {
        self.id.clone()
    }

    #[inline]
    fn version(&self) -> u32 {
        self.version
    }

    fn connection(&self) -> Option<Connection> {
        self.backend.upgrade().map(Connection::from_backend)
    }

    fn from_id(conn: &Connection, id: ObjectId) -> Result<Self, InvalidId> {
        if !same_interface(id.interface(), Self::interface()) && !id.is_null() {
            return Err(InvalidId);
        }
        let version = conn.object_info(id.clone()).map(|info| info.version).unwrap_or(0);
        Ok(WlRegistry { id, version, backend: conn.backend().downgrade() })
    }

    fn parse_event(
        conn: &Connection,
        msg: Message<ObjectId>,
    ) -> Result<(Self, Self::Event), DispatchError> {
        let me = Self::from_id(conn, msg.sender_id.clone())
            .map_err(|_| DispatchError::bad_message::<Self>(&msg))?;
        match (msg.opcode, &msg.args[..]) {
            (0, [Argument::Uint(name), Argument::Str(Some(interface)), Argument::Uint(version)]) => {
                Ok((
                    me,
                    Event::Global {
                        name: *name,
                        interface: String::from_utf8_lossy(interface.as_bytes()).into_owned(),
                        version: *version,
                    },
                ))
            }
            (1, [Argument::Uint(name)]) => Ok((me, Event::GlobalRemove { name: *name })),
            _ => Err(DispatchError::bad_message::<Self>(&msg)),
        }
    }

    fn write_request(
        &self,
        _conn: &Connection,
        req: Self::Request,
    ) -> Result<(Message<ObjectId>, Option<(&'static Interface, u32)>), InvalidId> {
        match req {
            Request::Bind { name, id: (interface, version) } => {
                let interface_name = CString::new(interface.name)
                    .expect("interface names do not contain NUL bytes");
                Ok((
                    message!(
                        self.id.clone(),
                        0,
                        [
                            Argument::Uint(name),
                            Argument::Str(Some(Box::new(interface_name))),
                            Argument::Uint(version),
                            Argument::NewId(ObjectId::null()),
                        ],
                    ),
                    Some((interface, version)),
                ))
            }
        }
    }
}

impl WlRegistry {
    /// bind an object to the display
    ///
    /// Binds the global `name` as an object of interface `I` with the given version, and
    /// attaches `handler` to it. The version is not checked against the advertised one, see
    /// [`GlobalList::bind()`](crate::globals::GlobalList::bind) for a checked variant.
    pub fn bind<I, F>(&self, name: u32, version: u32, handler: F) -> Result<I, InvalidId>
    where
        I: Proxy,
        F: FnMut(&Connection, I, I::Event) + Send + 'static,
    {
        self.send_constructor(
            Request::Bind { name, id: (I::interface(), version) },
            ProxyData::<I>::new(handler),
        )
    }
}
