//! core global object
//!
//! The core global object. This is a special singleton object, always bound at id 1. It is
//! used for internal protocol features.

use waywire_backend::{
    client::WeakBackend,
    message,
    protocol::{same_interface, Argument, Interface, Message},
};

use super::{wl_callback::WlCallback, wl_registry::WlRegistry};
use crate::{Connection, DispatchError, InvalidId, ObjectId, Proxy, ProxyData};

/// global error values
///
/// These errors are global and can be emitted in response to any server request.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// server couldn't find object
    InvalidObject = 0,
    /// method doesn't exist on the specified interface or malformed request
    InvalidMethod = 1,
    /// server is out of memory
    NoMemory = 2,
    /// implementation error in compositor
    Implementation = 3,
}

impl TryFrom<u32> for Error {
    type Error = ();
    fn try_from(val: u32) -> Result<Error, ()> {
        match val {
            0 => Ok(Error::InvalidObject),
            1 => Ok(Error::InvalidMethod),
            2 => Ok(Error::NoMemory),
            3 => Ok(Error::Implementation),
            _ => Err(()),
        }
    }
}

impl From<Error> for u32 {
    fn from(val: Error) -> u32 {
        val as u32
    }
}

/// The minimal object version supporting this request
pub const REQ_SYNC_SINCE: u32 = 1;
/// The minimal object version supporting this request
pub const REQ_GET_REGISTRY_SINCE: u32 = 1;
/// The minimal object version supporting this event
pub const EVT_ERROR_SINCE: u32 = 1;
/// The minimal object version supporting this event
pub const EVT_DELETE_ID_SINCE: u32 = 1;

/// Requests of `wl_display`
#[derive(Debug)]
#[non_exhaustive]
pub enum Request {
    /// asynchronous roundtrip
    ///
    /// The server emits the `done` event on the returned `wl_callback` once every previous
    /// request has been handled. The callback is destroyed by the server after that.
    Sync {},
    /// get global registry object
    GetRegistry {},
}

/// Events of `wl_display`
///
/// Both are consumed by the connection itself and never reach a handler.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event {
    /// fatal error event
    Error {
        /// object where the error occurred
        object_id: ObjectId,
        /// error code
        code: u32,
        /// error description
        message: String,
    },
    /// acknowledge object ID deletion
    DeleteId {
        /// deleted object ID
        id: u32,
    },
}

/// core global object
#[derive(Debug, Clone)]
pub struct WlDisplay {
    id: ObjectId,
    version: u32,
    backend: WeakBackend,
}

impl PartialEq for WlDisplay {
    fn eq(&self, other: &WlDisplay) -> bool {
        self.id == other.id
    }
}

impl Eq for WlDisplay {}

impl Proxy for WlDisplay {
    type Request = Request;
    type Event = Event;

    #[inline]
    fn interface() -> &'static Interface {
        &super::WL_DISPLAY_INTERFACE
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
        Ok(WlDisplay { id, version, backend: conn.backend().downgrade() })
    }

    fn parse_event(
        conn: &Connection,
        msg: Message<ObjectId>,
    ) -> Result<(Self, Self::Event), DispatchError> {
        let me = Self::from_id(conn, msg.sender_id.clone())
            .map_err(|_| DispatchError::bad_message::<Self>(&msg))?;
        match (msg.opcode, &msg.args[..]) {
            (0, [Argument::Object(object_id), Argument::Uint(code), Argument::Str(Some(message))]) => {
                Ok((
                    me,
                    Event::Error {
                        object_id: object_id.clone(),
                        code: *code,
                        message: String::from_utf8_lossy(message.as_bytes()).into_owned(),
                    },
                ))
            }
            (1, [Argument::Uint(id)]) => Ok((me, Event::DeleteId { id: *id })),
            _ => Err(DispatchError::bad_message::<Self>(&msg)),
        }
    }

    fn write_request(
        &self,
        _conn: &Connection,
        req: Self::Request,
    ) -> Result<(Message<ObjectId>, Option<(&'static Interface, u32)>), InvalidId> {
        match req {
            Request::Sync {} => {
                Ok((message!(self.id.clone(), 0, [Argument::NewId(ObjectId::null())]), None))
            }
            Request::GetRegistry {} => {
                Ok((message!(self.id.clone(), 1, [Argument::NewId(ObjectId::null())]), None))
            }
        }
    }
}

impl WlDisplay {
    pub(crate) fn from_display(conn: &Connection) -> Self {
        WlDisplay { id: conn.backend.display_id(), version: 1, backend: conn.backend.downgrade() }
    }

    /// asynchronous roundtrip
    ///
    /// The handler receives the `done` event of the returned callback.
    pub fn sync<F>(&self, handler: F) -> Result<WlCallback, InvalidId>
    where
        F: FnMut(&Connection, WlCallback, super::wl_callback::Event) + Send + 'static,
    {
        self.send_constructor(Request::Sync {}, ProxyData::<WlCallback>::new(handler))
    }

    /// get global registry object
    ///
    /// The handler receives the `global` and `global_remove` events of the registry. The
    /// server side resources of a registry are only released on disconnection, so this should
    /// be called sparingly.
    pub fn get_registry<F>(&self, handler: F) -> Result<WlRegistry, InvalidId>
    where
        F: FnMut(&Connection, WlRegistry, super::wl_registry::Event) + Send + 'static,
    {
        self.send_constructor(Request::GetRegistry {}, ProxyData::<WlRegistry>::new(handler))
    }
}

