use std::{
    env, fmt,
    os::unix::io::{FromRawFd, OwnedFd},
    os::unix::net::UnixStream,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use waywire_backend::{
    client::{Backend, InvalidId, ObjectData, ObjectId, WaylandError},
    map::MapError,
    protocol::{Message, ObjectInfo, ProtocolError},
};

use crate::{protocol::wl_display, protocol::wl_display::WlDisplay, Proxy, ProxyData};

/// Socket name used when `WAYLAND_DISPLAY` is not set
pub const DEFAULT_DISPLAY_NAME: &str = "wayland-0";

/// The Wayland connection
///
/// This is the main type representing your connection to the Wayland server, though most of the
/// interaction with the protocol are actually done using the proxies. It owns the socket and the
/// table of objects, proxies only keep a weak handle to it.
///
/// It can be created through the [`connect_to_env()`][Self::connect_to_env()] method to follow the
/// configuration from the environment (which is what you'll do most of the time), or using the
/// [`from_socket()`][Self::from_socket()] method if you retrieved your connected Wayland socket
/// through other means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub(crate) backend: Backend,
}

impl Connection {
    /// Try to connect to the Wayland server following the environment
    ///
    /// If `WAYLAND_SOCKET` is set it must contain an already connected socket fd, which is used
    /// directly. Otherwise the socket `WAYLAND_DISPLAY` (`wayland-0` if unset) is connected, in
    /// `XDG_RUNTIME_DIR` unless it is an absolute path.
    pub fn connect_to_env() -> Result<Self, ConnectError> {
        let stream = if let Ok(txt) = env::var("WAYLAND_SOCKET") {
            // We should connect to the provided WAYLAND_SOCKET
            let fd = txt.parse::<i32>().map_err(|_| ConnectError::InvalidFd)?;
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };
            // remove the variable so any child processes don't see it
            env::remove_var("WAYLAND_SOCKET");
            // set the CLOEXEC flag on this FD
            let flags = rustix::io::fcntl_getfd(&fd);
            let result = flags
                .map(|f| f | rustix::io::FdFlags::CLOEXEC)
                .and_then(|f| rustix::io::fcntl_setfd(&fd, f));
            match result {
                Ok(_) => UnixStream::from(fd),
                Err(_) => return Err(ConnectError::InvalidFd),
            }
        } else {
            let socket_name: PathBuf = env::var_os("WAYLAND_DISPLAY")
                .map(Into::into)
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.into());

            let socket_path = if socket_name.is_absolute() {
                socket_name
            } else {
                let mut socket_path = env::var_os("XDG_RUNTIME_DIR")
                    .map(Into::<PathBuf>::into)
                    .ok_or(ConnectError::NoCompositor)?;
                if !socket_path.is_absolute() {
                    return Err(ConnectError::NoCompositor);
                }
                socket_path.push(socket_name);
                socket_path
            };

            log::debug!("Connecting to {}", socket_path.display());
            UnixStream::connect(socket_path).map_err(|_| ConnectError::NoCompositor)?
        };

        Ok(Self::from_socket(stream))
    }

    /// Initialize a Wayland connection from an already existing Unix stream
    pub fn from_socket(stream: UnixStream) -> Self {
        Self { backend: Backend::connect(stream) }
    }

    /// Wrap an existing [`Backend`] into a [`Connection`]
    pub fn from_backend(backend: Backend) -> Self {
        Self { backend }
    }

    /// Get the [`Backend`] underlying this [`Connection`]
    pub fn backend(&self) -> Backend {
        self.backend.clone()
    }

    /// Get the `WlDisplay` associated with this connection
    pub fn display(&self) -> WlDisplay {
        WlDisplay::from_display(self)
    }

    /// Flush pending outgoing requests to the server
    ///
    /// Requests are buffered until this is called, or until the buffer is full. This blocks until
    /// the server socket accepted all of them.
    pub fn flush(&self) -> Result<(), WaylandError> {
        self.backend.flush()
    }

    /// Read one event from the server and dispatch it
    ///
    /// This blocks until a whole message is available. It does not flush the outgoing requests:
    /// waiting for the answer to a request that was not flushed blocks forever.
    pub fn read(&self) -> Result<(), WaylandError> {
        self.backend.dispatch_one()
    }

    /// Dispatch the events that can be read without blocking
    ///
    /// Returns the number of processed messages.
    pub fn dispatch_pending(&self) -> Result<usize, WaylandError> {
        self.backend.dispatch_pending()
    }

    /// Do a roundtrip to the server
    ///
    /// This method will block until the Wayland server has processed and answered all your
    /// preceding requests. The events the server sent in the meantime are dispatched. This is
    /// notably useful during the initial setup of an app, to wait for the initial state from
    /// the server.
    ///
    /// Returns the number of processed messages.
    pub fn roundtrip(&self) -> Result<usize, WaylandError> {
        let done = Arc::new(SyncData::default());
        let display = self.display();
        self.send_request(&display, wl_display::Request::Sync {}, Some(done.clone()))
            .map_err(|_| WaylandError::Io(rustix::io::Errno::PIPE.into()))?;
        self.backend.flush()?;

        let mut dispatched = 0;
        while !done.done.load(Ordering::Acquire) {
            self.backend.dispatch_one()?;
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Retrieve the protocol error that occured on the connection if any
    ///
    /// If this method returns [`Some`], it means your Wayland connection is already dead.
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        self.backend.protocol_error()
    }

    /// Send a request associated with the provided object
    ///
    /// This is a low-level interface used by the stubs, you will likely instead use the methods
    /// of the types representing each interface, or [`Proxy::send_request()`] and
    /// [`Proxy::send_constructor()`].
    pub fn send_request<I: Proxy>(
        &self,
        proxy: &I,
        request: I::Request,
        data: Option<Arc<dyn ObjectData>>,
    ) -> Result<ObjectId, InvalidId> {
        let (msg, child_spec) = proxy.write_request(self, request)?;
        self.backend.send_request(msg, data, child_spec)
    }

    /// Send a raw message, see [`Backend::send_request()`]
    pub fn send_message(
        &self,
        msg: Message<ObjectId>,
        data: Option<Arc<dyn ObjectData>>,
    ) -> Result<ObjectId, InvalidId> {
        self.backend.send_request(msg, data, None)
    }

    /// Attach an event handler to an object, replacing the previous one
    ///
    /// This is notably needed for objects created by the server, which have no handler.
    pub fn assign<I, F>(&self, proxy: &I, handler: F) -> Result<(), InvalidId>
    where
        I: Proxy,
        F: FnMut(&Connection, I, I::Event) + Send + 'static,
    {
        self.backend.set_data(proxy.id(), ProxyData::<I>::new(handler))
    }

    /// Get the protocol information related to given object ID
    pub fn object_info(&self, id: ObjectId) -> Result<ObjectInfo, InvalidId> {
        self.backend.info(id)
    }

    /// Find the live object using a protocol id
    pub fn lookup(&self, protocol_id: u32) -> Result<ObjectId, InvalidId> {
        self.backend.lookup(protocol_id)
    }

    /// Reserve a protocol id for an object to be created
    ///
    /// See [`Backend::allocate_id()`].
    pub fn allocate_id(&self) -> ObjectId {
        self.backend.allocate_id()
    }

    /// Release a protocol id, see [`Backend::deallocate_id()`]
    pub fn deallocate_id(&self, id: ObjectId) -> Result<(), MapError> {
        self.backend.deallocate_id(id)
    }

    /// Get the object data for a given object ID
    pub fn get_object_data(&self, id: ObjectId) -> Result<Arc<dyn ObjectData>, InvalidId> {
        self.backend.get_data(id)
    }

    /// Set the object data for a given object ID
    pub fn set_object_data(&self, id: ObjectId, data: Arc<dyn ObjectData>) -> Result<(), InvalidId> {
        self.backend.set_data(id, data)
    }
}

/// An error when trying to establish a Wayland connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// Could not find wayland compositor
    NoCompositor,

    /// `WAYLAND_SOCKET` was set but contained garbage
    InvalidFd,
}

impl std::error::Error for ConnectError {}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectError::NoCompositor => {
                write!(f, "Could not find wayland compositor")
            }
            ConnectError::InvalidFd => {
                write!(f, "WAYLAND_SOCKET was set but contained garbage")
            }
        }
    }
}

/*
 * Roundtrip helper
 */

#[derive(Debug, Default)]
struct SyncData {
    done: AtomicBool,
}

impl ObjectData for SyncData {
    fn event(
        self: Arc<Self>,
        _backend: &Backend,
        _msg: Message<ObjectId>,
    ) -> Option<Arc<dyn ObjectData>> {
        self.done.store(true, Ordering::Release);
        None
    }

    fn destroyed(&self, _: ObjectId) {}
}
