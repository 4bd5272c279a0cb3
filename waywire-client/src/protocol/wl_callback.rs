//! callback object
//!
//! Clients can handle the `done` event to get notified when the related request is done. The
//! object is destroyed by the server right after sending it.

use waywire_backend::{
    client::WeakBackend,
    protocol::{same_interface, Argument, Interface, Message},
};

use crate::{Connection, DispatchError, InvalidId, ObjectId, Proxy};

/// The minimal object version supporting this event
pub const EVT_DONE_SINCE: u32 = 1;

/// Requests of `wl_callback`
///
/// This interface has none.
#[derive(Debug)]
#[non_exhaustive]
pub enum Request {}

/// Events of `wl_callback`
#[derive(Debug)]
#[non_exhaustive]
pub enum Event {
    /// done event
    ///
    /// Notify the client when the related request is done. This is a destructor.
    Done {
        /// request-specific data for the callback, the event serial for `wl_display.sync`
        callback_data: u32,
    },
}

/// callback object
#[derive(Debug, Clone)]
pub struct WlCallback {
    id: ObjectId,
    version: u32,
    backend: WeakBackend,
}

impl PartialEq for WlCallback {
    fn eq(&self, other: &WlCallback) -> bool {
        self.id == other.id
    }
}

impl Eq for WlCallback {}

impl Proxy for WlCallback {
    type Request = Request;
    type Event = Event;

    #[inline]
    fn interface() -> &'static Interface {
        &super::WL_CALLBACK_INTERFACE
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
        Ok(WlCallback { id, version, backend: conn.backend().downgrade() })
    }

    fn parse_event(
        conn: &Connection,
        msg: Message<ObjectId>,
    ) -> Result<(Self, Self::Event), DispatchError> {
        let me = Self::from_id(conn, msg.sender_id.clone())
            .map_err(|_| DispatchError::bad_message::<Self>(&msg))?;
        match (msg.opcode, &msg.args[..]) {
            (0, [Argument::Uint(callback_data)]) => {
                Ok((me, Event::Done { callback_data: *callback_data }))
            }
            _ => Err(DispatchError::bad_message::<Self>(&msg)),
        }
    }

    fn write_request(
        &self,
        _conn: &Connection,
        req: Self::Request,
    ) -> Result<(Message<ObjectId>, Option<(&'static Interface, u32)>), InvalidId> {
        match req {}
    }
}
