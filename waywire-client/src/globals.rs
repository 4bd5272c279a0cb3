//! Helpers for handling the initialization of an app
//!
//! The [`GlobalList`] creates a registry, keeps track of the globals the server advertises and
//! binds them on request after checking their interface and version.
//!
//! ```no_run
//! use waywire_client::{globals::GlobalList, Connection};
//!
//! let conn = Connection::connect_to_env().unwrap();
//! let globals = GlobalList::new(&conn).unwrap();
//! // wait for the initial burst of globals
//! conn.roundtrip().unwrap();
//! for global in globals.contents() {
//!     println!("[{}] {} (v{})", global.name, global.interface, global.version);
//! }
//! ```

use std::{
    fmt,
    ops::RangeInclusive,
    sync::{Arc, Mutex},
};

use crate::{
    protocol::wl_registry::{self, WlRegistry},
    Connection, InvalidId, ObjectId, Proxy, UnassignedData,
};

/// A global advertised by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// The name of the global, used to bind it
    pub name: u32,
    /// The interface of the global
    pub interface: String,
    /// The highest version the server supports for this global
    pub version: u32,
}

/// Event provided to the user callback of [`GlobalList`]
#[derive(Debug)]
pub enum GlobalEvent {
    /// A new global was created
    New {
        /// Name of the new global
        name: u32,
        /// Interface of the new global
        interface: String,
        /// Maximum supported version of the new global
        version: u32,
    },
    /// A global was removed
    Removed {
        /// Name of the removed global
        name: u32,
        /// Interface of the removed global
        interface: String,
        /// The objects that were bound to it through the list
        ///
        /// Their handlers were released, the objects stay valid until destroyed.
        bound: Vec<ObjectId>,
    },
}

/// An error that occurred trying to bind a global
#[derive(Debug, PartialEq, Eq)]
pub enum BindError {
    /// The requested global was not advertised by the server
    Missing,
    /// The global advertised by the server has a lower version number than the one requested
    UnsupportedVersion(u32),
    /// The registry or the connection is dead
    InvalidId,
}

impl std::error::Error for BindError {}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BindError::Missing => f.write_str("The requested global was missing."),
            BindError::UnsupportedVersion(v) => {
                write!(f, "The requested global's version is too low (the server supports {v}).")
            }
            BindError::InvalidId => f.write_str("The registry is no longer valid."),
        }
    }
}

impl From<InvalidId> for BindError {
    fn from(_: InvalidId) -> Self {
        BindError::InvalidId
    }
}

#[derive(Debug, Default)]
struct Inner {
    list: Vec<Global>,
    bound: Vec<(u32, ObjectId)>,
}

impl Inner {
    fn add(&mut self, global: Global) {
        self.list.push(global);
    }

    // Forget the global, returning it with the objects bound to it
    fn remove(&mut self, name: u32) -> Option<(Global, Vec<ObjectId>)> {
        let index = self.list.iter().position(|global| global.name == name)?;
        let global = self.list.remove(index);
        let mut bound = Vec::new();
        self.bound.retain(|(global_name, id)| {
            if *global_name == name {
                bound.push(id.clone());
                false
            } else {
                true
            }
        });
        Some((global, bound))
    }

    // Forget the bound objects that were destroyed since
    fn prune(&mut self, alive: impl Fn(&ObjectId) -> bool) {
        self.bound.retain(|(_, id)| alive(id));
    }

    fn find(&self, interface: &str) -> Option<&Global> {
        self.list.iter().find(|global| global.interface == interface)
    }
}

/// An utility to manage global objects
///
/// This utility provides an implementation for the registry that tracks the list of globals for
/// you, as well as utilities to bind them.
#[derive(Clone, Debug)]
pub struct GlobalList {
    inner: Arc<Mutex<Inner>>,
    registry: WlRegistry,
}

impl GlobalList {
    /// Create a global list handling a new registry
    ///
    /// The list is empty until the server events are dispatched, usually with
    /// [`Connection::roundtrip()`].
    pub fn new(conn: &Connection) -> Result<Self, InvalidId> {
        Self::new_with_cb(conn, |_, _, _| {})
    }

    /// Create a global list handling a new registry, with a callback
    ///
    /// The list tracks the globals as [`GlobalList::new()`] does, and also forwards the
    /// registry events to your callback. This can be used to bind some globals as soon as they
    /// are advertised (such as every `wl_output`), while using the list for the rest.
    pub fn new_with_cb<F>(conn: &Connection, mut callback: F) -> Result<Self, InvalidId>
    where
        F: FnMut(&Connection, &WlRegistry, GlobalEvent) + Send + 'static,
    {
        let inner = Arc::new(Mutex::new(Inner::default()));
        let inner_clone = inner.clone();

        let registry = conn.display().get_registry(move |conn, registry, event| match event {
            wl_registry::Event::Global { name, interface, version } => {
                inner.lock().unwrap().add(Global { name, interface: interface.clone(), version });
                callback(conn, &registry, GlobalEvent::New { name, interface, version });
            }
            wl_registry::Event::GlobalRemove { name } => {
                let removed = inner.lock().unwrap().remove(name);
                match removed {
                    Some((global, bound)) => {
                        for id in &bound {
                            // the object may have been destroyed already
                            let _ = conn.set_object_data(id.clone(), Arc::new(UnassignedData));
                        }
                        callback(
                            conn,
                            &registry,
                            GlobalEvent::Removed { name, interface: global.interface, bound },
                        );
                    }
                    None => log::warn!("The server removed non-existing global {name}."),
                }
            }
        })?;

        Ok(GlobalList { inner: inner_clone, registry })
    }

    /// Bind a global
    ///
    /// The version range contains the versions your code supports. The highest version of it
    /// that the server also supports is used, it is an error if the server only supports
    /// versions lower than the range.
    ///
    /// This is only appropriate for globals that are expected to not exist with multiplicity
    /// (such as `wl_compositor` or `wl_shm`), as it will always bind the first one that was
    /// advertised.
    ///
    /// **Panic:** if the upper bound of the range is higher than the version of the interface
    /// known by the stubs of `I`.
    pub fn bind<I, F>(&self, version: RangeInclusive<u32>, handler: F) -> Result<I, BindError>
    where
        I: Proxy,
        F: FnMut(&Connection, I, I::Event) + Send + 'static,
    {
        let max_version = I::interface().version;
        if *version.end() > max_version {
            panic!(
                "Maximum version ({}) of {} was higher than the proxy's maximum version ({}); outdated stubs?",
                version.end(),
                I::interface().name,
                max_version
            );
        }

        let (name, server_version) = {
            let inner = self.inner.lock().unwrap();
            let global = inner.find(I::interface().name).ok_or(BindError::Missing)?;
            (global.name, global.version)
        };

        if server_version < *version.start() {
            return Err(BindError::UnsupportedVersion(server_version));
        }
        let version = server_version.min(*version.end());

        let proxy: I = self.registry.bind(name, version, handler)?;
        let conn = self.registry.connection().ok_or(BindError::InvalidId)?;
        let mut inner = self.inner.lock().unwrap();
        inner.prune(|id| conn.object_info(id.clone()).is_ok());
        inner.bound.push((name, proxy.id()));
        Ok(proxy)
    }

    /// Retrieve the list of currently known globals
    pub fn contents(&self) -> Vec<Global> {
        self.inner.lock().unwrap().list.clone()
    }

    /// The registry handled by this list
    pub fn registry(&self) -> &WlRegistry {
        &self.registry
    }
}
