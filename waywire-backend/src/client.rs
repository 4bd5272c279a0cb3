//! Client-side implementation of the protocol backend
//!
//! The [`Backend`] owns the socket and the object map of a connection. Requests are sent with
//! [`Backend::send_request()`], events are read and dispatched to the [`ObjectData`] of their
//! target object with [`Backend::dispatch_one()`] or [`Backend::dispatch_pending()`].

use std::{
    fmt,
    io::ErrorKind,
    os::unix::net::UnixStream,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use smallvec::SmallVec;

use crate::{
    core_interfaces::{WL_DISPLAY_DELETE_ID, WL_DISPLAY_ERROR, WL_DISPLAY_INTERFACE},
    debug,
    map::{MapError, Object, ObjectMap, SERVER_ID_LIMIT},
    protocol::{
        check_for_signature, same_interface, same_interface_or_anonymous, AllowNull, Argument,
        ArgumentType, Interface, Message, ObjectInfo, ProtocolError, ANONYMOUS_INTERFACE,
        INLINE_ARGS,
    },
    socket::{BufferedSocket, Socket},
    wire::MessageParseError,
};

pub use crate::types::{InvalidId, WaylandError};

/// Protocol id of the display object, bound when the connection is created
pub const DISPLAY_ID: u32 = 1;

/// A trait representing your data associated to an object
///
/// You will only be given access to it as a `&` reference, so you
/// need to handle interior mutability by yourself.
///
/// The methods of this trait will be invoked internally every time a
/// new object is created to initialize its data.
pub trait ObjectData: downcast_rs::DowncastSync {
    /// Dispatch an event for the associated object
    ///
    /// If the event has a `NewId` argument, the callback must return the object data
    /// for the newly created object
    fn event(
        self: Arc<Self>,
        backend: &Backend,
        msg: Message<ObjectId>,
    ) -> Option<Arc<dyn ObjectData>>;

    /// Notification that the object has been destroyed and is no longer active
    fn destroyed(&self, object_id: ObjectId);

    /// Helper for forwarding a Debug implementation of your `ObjectData` type
    ///
    /// By default will just print `ObjectData { ... }`
    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectData").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for dyn ObjectData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.debug(f)
    }
}

downcast_rs::impl_downcast!(sync ObjectData);

// Data of the display, and of children whose data was not provided yet
struct DumbObjectData;

impl ObjectData for DumbObjectData {
    fn event(
        self: Arc<Self>,
        _backend: &Backend,
        msg: Message<ObjectId>,
    ) -> Option<Arc<dyn ObjectData>> {
        log::warn!("Ignoring event {}.{}: object has no data.", msg.sender_id, msg.opcode);
        None
    }

    fn destroyed(&self, _object_id: ObjectId) {}

    fn debug(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumbObjectData").finish()
    }
}

#[derive(Debug, Clone)]
struct Data {
    client_destroyed: bool,
    server_destroyed: bool,
    user_data: Arc<dyn ObjectData>,
    serial: u32,
}

/// An ID representing a Wayland object
///
/// Besides the protocol id, it records a serial that distinguishes this object from any later
/// object reusing the same protocol id, so a handle to a destroyed object stays invalid.
#[derive(Clone)]
pub struct ObjectId {
    serial: u32,
    id: u32,
    interface: &'static Interface,
}

impl std::cmp::PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.serial == other.serial
            && same_interface(self.interface, other.interface)
    }
}

impl std::cmp::Eq for ObjectId {}

impl std::hash::Hash for ObjectId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.interface.name, self.id)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({}, {})", self, self.serial)
    }
}

impl ObjectId {
    /// Create a null object ID
    ///
    /// This object ID is always invalid, and can be used as placeholder for the new id
    /// argument of a request.
    pub fn null() -> Self {
        Self { serial: 0, id: 0, interface: &ANONYMOUS_INTERFACE }
    }

    /// Check if this is the null ID
    #[inline]
    pub fn is_null(&self) -> bool {
        self.id == 0
    }

    /// Interface of the represented object
    #[inline]
    pub fn interface(&self) -> &'static Interface {
        self.interface
    }

    /// Return the protocol-level numerical ID of this object
    ///
    /// Protocol IDs are reused after object destruction, so this should not be used as a
    /// unique identifier.
    #[inline]
    pub fn protocol_id(&self) -> u32 {
        self.id
    }
}

#[derive(Debug)]
struct ProtocolState {
    socket: BufferedSocket,
    map: ObjectMap<Data>,
    last_error: Option<WaylandError>,
    last_serial: u32,
    debug: bool,
}

/// A pure rust implementation of a Wayland client backend
///
/// This type hosts the plumbing functionalities for interacting with the wayland protocol.
/// It is a cheap handle, clones share the same connection.
#[derive(Clone, Debug)]
pub struct Backend {
    state: Arc<Mutex<ProtocolState>>,
}

/// A weak handle to a [`Backend`]
///
/// This handle behaves similarly to [`Weak`], and can be used to keep access to
/// the backend without actually preventing it from being dropped.
#[derive(Clone, Debug)]
pub struct WeakBackend {
    state: Weak<Mutex<ProtocolState>>,
}

impl WeakBackend {
    /// Try to create a new [`Backend`] from this weak handle
    ///
    /// Returns `None` if the backend was already dropped.
    pub fn upgrade(&self) -> Option<Backend> {
        Weak::upgrade(&self.state).map(|state| Backend { state })
    }
}

impl PartialEq for Backend {
    fn eq(&self, rhs: &Self) -> bool {
        Arc::ptr_eq(&self.state, &rhs.state)
    }
}

impl Eq for Backend {}

impl Backend {
    /// Initialize a Wayland backend on the provided unix stream
    ///
    /// The provided stream should correspond to an already established unix connection with
    /// the Wayland server. The display object is bound at id 1.
    pub fn connect(stream: UnixStream) -> Self {
        let socket = BufferedSocket::new(Socket::from(stream));
        let mut map = ObjectMap::new();
        let display = Object {
            interface: &WL_DISPLAY_INTERFACE,
            version: 1,
            data: Data {
                client_destroyed: false,
                server_destroyed: false,
                user_data: Arc::new(DumbObjectData),
                serial: 0,
            },
        };
        let display_id = map.client_insert_new(display);
        debug_assert_eq!(display_id, DISPLAY_ID);

        let debug = debug::has_debug_client_env();

        Self {
            state: Arc::new(Mutex::new(ProtocolState {
                socket,
                map,
                last_error: None,
                last_serial: 0,
                debug,
            })),
        }
    }

    /// Create a weak handle to this backend
    pub fn downgrade(&self) -> WeakBackend {
        WeakBackend { state: Arc::downgrade(&self.state) }
    }

    fn lock_state(&self) -> MutexGuard<'_, ProtocolState> {
        self.state.lock().unwrap()
    }

    /// Get the object ID for the `wl_display`
    pub fn display_id(&self) -> ObjectId {
        ObjectId { serial: 0, id: DISPLAY_ID, interface: &WL_DISPLAY_INTERFACE }
    }

    /// Get the last error that occurred on this backend
    ///
    /// If this returns an error, your Wayland connection is already dead.
    pub fn last_error(&self) -> Option<WaylandError> {
        self.lock_state().last_error.clone()
    }

    /// Get the protocol error that killed this connection, if any
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        match self.lock_state().last_error {
            Some(WaylandError::Protocol(ref err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// Flush all pending outgoing requests to the server
    ///
    /// Blocks until the socket accepted all the buffered requests.
    pub fn flush(&self) -> Result<(), WaylandError> {
        let mut guard = self.lock_state();
        guard.no_last_error()?;
        if let Err(e) = guard.socket.flush_blocking() {
            return Err(guard.store_and_return_error(e));
        }
        Ok(())
    }

    /// Get the detailed information about a wayland object
    ///
    /// Returns an error if the provided object ID is no longer valid.
    pub fn info(&self, id: ObjectId) -> Result<ObjectInfo, InvalidId> {
        let object = self.lock_state().get_object(&id)?;
        if object.data.client_destroyed {
            Err(InvalidId)
        } else {
            Ok(ObjectInfo { id: id.id, interface: object.interface, version: object.version })
        }
    }

    /// Find the live object currently using the given protocol id
    pub fn lookup(&self, protocol_id: u32) -> Result<ObjectId, InvalidId> {
        let guard = self.lock_state();
        match guard.map.find(protocol_id) {
            Some(obj) if !obj.data.client_destroyed => Ok(ObjectId {
                serial: obj.data.serial,
                id: protocol_id,
                interface: obj.interface,
            }),
            _ => Err(InvalidId),
        }
    }

    /// Reserve a protocol id in the client range
    ///
    /// The returned ID can be given as the new id argument of a request to create the object
    /// at this id, or released with [`deallocate_id()`](Self::deallocate_id).
    pub fn allocate_id(&self) -> ObjectId {
        let id = self.lock_state().map.allocate();
        ObjectId { serial: 0, id, interface: &ANONYMOUS_INTERFACE }
    }

    /// Release a protocol id of the client range
    ///
    /// If an object was using this id it is dropped without any message being sent to the
    /// server, which is only correct if the server never heard of it.
    pub fn deallocate_id(&self, id: ObjectId) -> Result<(), MapError> {
        let removed = self.lock_state().map.deallocate(id.id)?;
        if let Some(object) = removed {
            object.data.user_data.destroyed(ObjectId {
                serial: object.data.serial,
                id: id.id,
                interface: object.interface,
            });
        }
        Ok(())
    }

    /// Sends a request to the server
    ///
    /// Returns an error if the sender ID of the provided message is no longer valid. If the
    /// request creates an object, its ID is returned, otherwise the null ID is returned.
    ///
    /// **Panic:**
    ///
    /// Several checks against the protocol specification are done, and this method will panic if they do
    /// not pass:
    ///
    /// - the message opcode must be valid for the sender interface
    /// - the argument list must match the prototype for the message associated with this opcode
    /// - if the method creates a new object, the new id argument must be [`ObjectId::null()`] or an
    ///   id reserved with [`allocate_id()`](Self::allocate_id), and `data` must be provided
    /// - the child specification, if given, must match what the protocol says about the new object.
    ///   It is required for generic constructors such as `wl_registry.bind`.
    pub fn send_request(
        &self,
        Message { sender_id: id, opcode, args }: Message<ObjectId>,
        data: Option<Arc<dyn ObjectData>>,
        child_spec: Option<(&'static Interface, u32)>,
    ) -> Result<ObjectId, InvalidId> {
        let mut guard = self.lock_state();
        let object = guard.get_object(&id)?;

        let message_desc = match object.interface.requests.get(opcode as usize) {
            Some(msg) => msg,
            None => {
                panic!("Unknown opcode {} for object {}@{}.", opcode, object.interface.name, id.id);
            }
        };

        if object.data.client_destroyed {
            if guard.debug {
                debug::print_send_message(id.interface.name, id.id, message_desc.name, &args, true);
            }
            log::warn!("Discarding {}.{}: the object is destroyed.", id, message_desc.name);
            return Err(InvalidId);
        }

        if !check_for_signature(message_desc.signature, &args) {
            panic!(
                "Unexpected signature for request {}@{}.{}: expected {:?}, got {:?}.",
                object.interface.name, id.id, message_desc.name, message_desc.signature, args
            );
        }

        // Prepare the child object
        let child_spec = if message_desc
            .signature
            .iter()
            .any(|arg| matches!(arg, ArgumentType::NewId))
        {
            if let Some((iface, version)) = child_spec {
                if let Some(child_interface) = message_desc.child_interface {
                    if !same_interface(child_interface, iface) {
                        panic!(
                            "Error when sending request {}@{}.{}: expected interface {} but got {}",
                            object.interface.name,
                            id.id,
                            message_desc.name,
                            child_interface.name,
                            iface.name
                        );
                    }
                    if version != object.version {
                        panic!(
                            "Error when sending request {}@{}.{}: expected version {} but got {}",
                            object.interface.name,
                            id.id,
                            message_desc.name,
                            object.version,
                            version
                        );
                    }
                }
                Some((iface, version))
            } else if let Some(child_interface) = message_desc.child_interface {
                Some((child_interface, object.version))
            } else {
                panic!(
                    "Error when sending request {}@{}.{}: target interface must be specified for a generic constructor.",
                    object.interface.name,
                    id.id,
                    message_desc.name
                );
            }
        } else {
            None
        };

        let child = if let Some((child_interface, child_version)) = child_spec {
            let requested_id = args
                .iter()
                .find_map(|arg| match arg {
                    Argument::NewId(p) => Some(p.id),
                    _ => None,
                })
                .unwrap_or(0);
            if requested_id != 0 && !guard.map.is_reserved(requested_id) {
                panic!(
                    "The newid provided when sending request {}@{}.{} is neither a placeholder nor a reserved id.",
                    object.interface.name, id.id, message_desc.name
                );
            }
            let user_data = match data {
                Some(data) => data,
                None => panic!(
                    "Sending request {}@{}.{} creating an object without providing an object data.",
                    object.interface.name, id.id, message_desc.name
                ),
            };

            let child_serial = guard.next_serial();
            let child = Object {
                interface: child_interface,
                version: child_version,
                data: Data {
                    client_destroyed: false,
                    server_destroyed: false,
                    user_data,
                    serial: child_serial,
                },
            };

            let child_id = if requested_id == 0 {
                guard.map.client_insert_new(child)
            } else {
                // the slot was just checked to be reserved
                if guard.map.insert_at(requested_id, child).is_err() {
                    unreachable!();
                }
                requested_id
            };
            Some(ObjectId { id: child_id, serial: child_serial, interface: child_interface })
        } else {
            None
        };

        // Prepare the message in a debug-compatible way
        let args = args
            .into_iter()
            .map(|arg| match (arg, &child) {
                (Argument::NewId(_), Some(child_id)) => Argument::NewId(child_id.clone()),
                (arg, _) => arg,
            })
            .collect::<SmallVec<[_; INLINE_ARGS]>>();

        if guard.debug {
            debug::print_send_message(
                object.interface.name,
                id.id,
                message_desc.name,
                &args,
                false,
            );
        }
        log::debug!("Sending {}.{} ({})", id, message_desc.name, debug::DisplaySlice(&args));

        // Send the message
        let mut msg_args = SmallVec::with_capacity(args.len());
        let mut arg_interfaces = message_desc.arg_interfaces.iter();
        for (i, arg) in args.into_iter().enumerate() {
            msg_args.push(match arg {
                Argument::Array(a) => Argument::Array(a),
                Argument::Int(i) => Argument::Int(i),
                Argument::Uint(u) => Argument::Uint(u),
                Argument::Str(s) => Argument::Str(s),
                Argument::Fixed(f) => Argument::Fixed(f),
                Argument::NewId(nid) => Argument::NewId(nid.id),
                Argument::Fd(f) => Argument::Fd(f),
                Argument::Object(o) => {
                    let next_interface: &'static Interface =
                        arg_interfaces.next().copied().unwrap_or(&ANONYMOUS_INTERFACE);
                    if o.id != 0 {
                        let arg_object = guard.get_object(&o)?;
                        if !same_interface_or_anonymous(next_interface, arg_object.interface) {
                            panic!("Request {}@{}.{} expects an argument of interface {} but {} was provided instead.", object.interface.name, id.id, message_desc.name, next_interface.name, arg_object.interface.name);
                        }
                    } else if !matches!(message_desc.signature[i], ArgumentType::Object(AllowNull::Yes)) {
                        panic!("Request {}@{}.{} expects an non-null object argument.", object.interface.name, id.id, message_desc.name);
                    }
                    Argument::Object(o.id)
                }
            });
        }

        let msg = Message { sender_id: id.id, opcode, args: msg_args };

        if let Err(err) = guard.socket.write_message(&msg) {
            guard.store_and_return_error(err);
        }

        // Handle destruction if relevant
        if message_desc.is_destructor {
            let server_destroyed = guard
                .map
                .with(id.id, |obj| {
                    obj.data.client_destroyed = true;
                    obj.data.server_destroyed
                })
                .unwrap_or(false);
            if server_destroyed {
                guard.map.remove(id.id);
            }
            drop(guard);
            object.data.user_data.destroyed(id);
        }

        Ok(child.unwrap_or_else(ObjectId::null))
    }

    /// Access the object data associated with a given object ID
    ///
    /// Returns an error if the object ID is not longer valid.
    pub fn get_data(&self, id: ObjectId) -> Result<Arc<dyn ObjectData>, InvalidId> {
        let object = self.lock_state().get_object(&id)?;
        Ok(object.data.user_data)
    }

    /// Set the object data associated with a given object ID
    ///
    /// Returns an error if the object ID is not longer valid.
    pub fn set_data(&self, id: ObjectId, data: Arc<dyn ObjectData>) -> Result<(), InvalidId> {
        self.lock_state()
            .map
            .with(id.id, move |objdata| {
                if objdata.data.serial != id.serial {
                    Err(InvalidId)
                } else {
                    objdata.data.user_data = data;
                    Ok(())
                }
            })
            .unwrap_or(Err(InvalidId))
    }

    /// Read a single event from the socket and dispatch it
    ///
    /// Blocks until a whole message is available. Events addressed to the display are handled
    /// internally, events addressed to an object destroyed by the client are discarded; both
    /// count as the one processed message.
    pub fn dispatch_one(&self) -> Result<(), WaylandError> {
        let mut guard = self.lock_state();
        guard.no_last_error()?;
        let message = guard.next_message(true)?.ok_or_else(|| {
            WaylandError::Io(std::io::Error::from(ErrorKind::WouldBlock))
        })?;
        self.dispatch_message(guard, message)?;
        Ok(())
    }

    /// Dispatch all events that can be read from the socket without blocking
    ///
    /// Returns the number of processed messages, which may be 0.
    pub fn dispatch_pending(&self) -> Result<usize, WaylandError> {
        let mut guard = self.lock_state();
        guard.no_last_error()?;
        let mut dispatched = 0;
        while let Some(message) = guard.next_message(false)? {
            guard = self.dispatch_message(guard, message)?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    // Dispatch one message, the lock is released while the user callback runs
    fn dispatch_message<'a>(
        &'a self,
        mut guard: MutexGuard<'a, ProtocolState>,
        message: Message<u32>,
    ) -> Result<MutexGuard<'a, ProtocolState>, WaylandError> {
        // Short-circuit display-associated events
        if message.sender_id == DISPLAY_ID {
            guard.handle_display_event(message)?;
            return Ok(guard);
        }

        // These lookups succeeded when parsing the message
        let Some(receiver) = guard.map.find(message.sender_id).cloned() else {
            return Err(guard.store_and_return_error(ProtocolError::local(format!(
                "Unknown object {}.",
                message.sender_id
            ))));
        };
        let Some(message_desc) = receiver.interface.events.get(message.opcode as usize) else {
            return Err(guard.store_and_return_error(ProtocolError::local(format!(
                "Unknown opcode {} for object {}@{}.",
                message.opcode, receiver.interface.name, message.sender_id
            ))));
        };

        let mut created_id = None;

        // Convert the arguments and create the new object if applicable
        let mut args = SmallVec::with_capacity(message.args.len());
        let mut arg_interfaces = message_desc.arg_interfaces.iter();
        for arg in message.args.into_iter() {
            args.push(match arg {
                Argument::Array(a) => Argument::Array(a),
                Argument::Int(i) => Argument::Int(i),
                Argument::Uint(u) => Argument::Uint(u),
                Argument::Str(s) => Argument::Str(s),
                Argument::Fixed(f) => Argument::Fixed(f),
                Argument::Fd(f) => Argument::Fd(f),
                Argument::Object(o) => {
                    // a null object still takes its slot in the interface list
                    let next_interface = arg_interfaces.next();
                    if o != 0 {
                        // Lookup the object to make the appropriate Id
                        let Some(obj) = guard.map.find(o) else {
                            return Err(guard.store_and_return_error(ProtocolError::local(
                                format!("Unknown object {o}."),
                            )));
                        };
                        if let Some(next_interface) = next_interface {
                            if !same_interface_or_anonymous(next_interface, obj.interface) {
                                let err = ProtocolError::local(format!(
                                    "Protocol error: server sent object {} for interface {}, but it has interface {}.",
                                    o, next_interface.name, obj.interface.name
                                ));
                                return Err(guard.store_and_return_error(err));
                            }
                        }
                        Argument::Object(ObjectId { id: o, serial: obj.data.serial, interface: obj.interface })
                    } else {
                        Argument::Object(ObjectId::null())
                    }
                }
                Argument::NewId(new_id) => {
                    // An object should be created
                    let Some(child_interface) = message_desc.child_interface else {
                        let err = ProtocolError::local(format!(
                            "Received event {}@{}.{} which creates an object without specifying its interface.",
                            receiver.interface.name, message.sender_id, message_desc.name
                        ));
                        return Err(guard.store_and_return_error(err));
                    };

                    // if this ID belonged to a now destroyed server object, we can replace it
                    if new_id >= SERVER_ID_LIMIT
                        && guard.map.with(new_id, |obj| obj.data.client_destroyed).unwrap_or(false)
                    {
                        guard.map.remove(new_id);
                    }

                    let child_obj = Object {
                        interface: child_interface,
                        version: receiver.version,
                        data: Data {
                            client_destroyed: receiver.data.client_destroyed,
                            server_destroyed: false,
                            user_data: Arc::new(DumbObjectData),
                            serial: guard.next_serial(),
                        },
                    };

                    let child_id = ObjectId { id: new_id, serial: child_obj.data.serial, interface: child_obj.interface };
                    created_id = Some(child_id.clone());

                    if let Err(e) = guard.map.insert_at(new_id, child_obj) {
                        // abort parsing, this is an unrecoverable error
                        let err = ProtocolError::local(format!(
                            "Protocol error: server tried to create an object \"{}\" with invalid id {}: {}",
                            child_interface.name, new_id, e
                        ));
                        return Err(guard.store_and_return_error(err));
                    }

                    Argument::NewId(child_id)
                }
            });
        }

        if guard.debug {
            debug::print_dispatched_message(
                receiver.interface.name,
                message.sender_id,
                message_desc.name,
                &args,
            );
        }

        // If this event is send to an already destroyed object (by the client), swallow it
        if receiver.data.client_destroyed {
            log::warn!(
                "Discarding event {}@{}.{}: the object is destroyed.",
                receiver.interface.name,
                message.sender_id,
                message_desc.name
            );
            return Ok(guard);
        }

        let id = ObjectId {
            id: message.sender_id,
            serial: receiver.data.serial,
            interface: receiver.interface,
        };

        // unlock the mutex while we invoke the user callback
        drop(guard);
        log::debug!("Dispatching {}.{} ({})", id, message_desc.name, debug::DisplaySlice(&args));
        let ret = receiver
            .data
            .user_data
            .clone()
            .event(self, Message { sender_id: id.clone(), opcode: message.opcode, args });
        // lock it again to resume dispatching
        let mut guard = self.lock_state();

        // If this event is a destructor, destroy the object
        if message_desc.is_destructor {
            guard.map.with(message.sender_id, |obj| {
                obj.data.server_destroyed = true;
                obj.data.client_destroyed = true;
            });
            receiver.data.user_data.destroyed(id);
        }

        match (created_id, ret) {
            (Some(child_id), Some(child_data)) => {
                guard.map.with(child_id.id, |obj| obj.data.user_data = child_data);
            }
            (None, None) => {}
            (Some(child_id), None) => {
                log::warn!("Callback creating object {child_id} did not provide any object data.");
            }
            (None, Some(_)) => {
                log::warn!("An object data was returned from a callback not creating any object.");
            }
        }

        Ok(guard)
    }
}

impl ProtocolState {
    fn next_serial(&mut self) -> u32 {
        self.last_serial = self.last_serial.wrapping_add(1);
        self.last_serial
    }

    #[inline]
    fn no_last_error(&self) -> Result<(), WaylandError> {
        if let Some(ref err) = self.last_error {
            Err(err.clone())
        } else {
            Ok(())
        }
    }

    #[inline]
    fn store_and_return_error(&mut self, err: impl Into<WaylandError>) -> WaylandError {
        let err = err.into();
        log::error!("{err}");
        if self.last_error.is_none() {
            self.last_error = Some(err.clone());
        }
        err
    }

    fn get_object(&self, id: &ObjectId) -> Result<Object<Data>, InvalidId> {
        let object = self.map.find(id.id).ok_or(InvalidId)?;
        if object.data.serial != id.serial {
            return Err(InvalidId);
        }
        Ok(object.clone())
    }

    // Parse the next message of the incoming buffer, reading the socket if needed
    //
    // Returns `None` when not blocking and no whole message is available.
    fn next_message(&mut self, blocking: bool) -> Result<Option<Message<u32>>, WaylandError> {
        loop {
            let ProtocolState { ref mut socket, ref map, .. } = *self;
            let mut unknown = None;
            let ret = socket.read_one_message(|id, opcode| {
                let signature = map
                    .find(id)
                    .and_then(|o| o.interface.events.get(opcode as usize))
                    .map(|desc| desc.signature);
                if signature.is_none() {
                    unknown = Some((id, opcode));
                }
                signature
            });
            match ret {
                Ok(msg) => return Ok(Some(msg)),
                Err(MessageParseError::MissingData) => {
                    let filled = if blocking {
                        self.socket.fill_incoming_buffers_blocking()
                    } else {
                        self.socket.fill_incoming_buffers()
                    };
                    match filled {
                        Ok(()) => continue,
                        Err(e) if !blocking && e.kind() == ErrorKind::WouldBlock => {
                            return Ok(None)
                        }
                        Err(e) => return Err(self.store_and_return_error(e)),
                    }
                }
                Err(MessageParseError::Malformed) => {
                    let err = match unknown {
                        Some((id, opcode)) => match self.map.find(id) {
                            Some(obj) => ProtocolError::local(format!(
                                "Unknown opcode {} for object {}@{}.",
                                opcode, obj.interface.name, id
                            )),
                            None => ProtocolError::local(format!(
                                "Received an event for unknown object {id}."
                            )),
                        },
                        None => ProtocolError::local("Malformed Wayland message."),
                    };
                    return Err(self.store_and_return_error(err));
                }
                Err(MessageParseError::FdUnsupported) => {
                    let err = ProtocolError::local(
                        "Received an event carrying a file descriptor, which is not supported.",
                    );
                    return Err(self.store_and_return_error(err));
                }
            }
        }
    }

    fn handle_display_event(&mut self, message: Message<u32>) -> Result<(), WaylandError> {
        if self.debug {
            debug::print_dispatched_message(
                "wl_display",
                message.sender_id,
                if message.opcode == WL_DISPLAY_ERROR { "error" } else { "delete_id" },
                &message.args,
            );
        }
        match (message.opcode, &message.args[..]) {
            (
                WL_DISPLAY_ERROR,
                [Argument::Object(obj), Argument::Uint(code), Argument::Str(Some(msg))],
            ) => {
                let object = self.map.find(*obj);
                let err = WaylandError::Protocol(ProtocolError {
                    code: *code,
                    object_id: *obj,
                    object_interface: object
                        .map(|obj| obj.interface.name)
                        .unwrap_or("<unknown>")
                        .into(),
                    message: msg.to_string_lossy().into(),
                });
                Err(self.store_and_return_error(err))
            }
            (WL_DISPLAY_DELETE_ID, [Argument::Uint(id)]) => {
                let client_destroyed = self.map.with(*id, |obj| {
                    obj.data.server_destroyed = true;
                    obj.data.client_destroyed
                });
                match client_destroyed {
                    Some(true) => {
                        self.map.remove(*id);
                    }
                    Some(false) => {
                        log::debug!("Server deleted id {id} before the client destroyed it.");
                    }
                    None => log::warn!("Received delete_id for unknown id {id}."),
                }
                Ok(())
            }
            _ => Err(self.store_and_return_error(ProtocolError::local(format!(
                "Invalid event {} on the display.",
                message.opcode
            )))),
        }
    }
}
