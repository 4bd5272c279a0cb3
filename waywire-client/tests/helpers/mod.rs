// This module contains helpers functions and types that
// are not test in themselves, but are used by several tests.

#![allow(dead_code)]

use std::ffi::CString;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use waywire_backend::{
    client::WeakBackend,
    core_interfaces::{WL_DISPLAY_DELETE_ID, WL_DISPLAY_ERROR},
    message,
    protocol::{same_interface, AllowNull, Argument, ArgumentType, Interface, Message, MessageDesc},
    wire::{parse_message, peek_header, write_to_buffers, HEADER_SIZE},
};
use waywire_client::{Connection, DispatchError, InvalidId, ObjectId, Proxy};

pub const DISPLAY: u32 = 1;

pub const SYNC_SIG: &[ArgumentType] = &[ArgumentType::NewId];
pub const GET_REGISTRY_SIG: &[ArgumentType] = &[ArgumentType::NewId];
pub const BIND_SIG: &[ArgumentType] = &[
    ArgumentType::Uint,
    ArgumentType::Str(AllowNull::No),
    ArgumentType::Uint,
    ArgumentType::NewId,
];
pub const PING_SIG: &[ArgumentType] = &[ArgumentType::Uint];
pub const DESTROY_SIG: &[ArgumentType] = &[];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn setup() -> (Connection, TestServer) {
    init_logger();
    let (client, server) = UnixStream::pair().unwrap();
    (Connection::from_socket(client), TestServer { stream: server })
}

/// The server end of a test connection, scripted by the tests
pub struct TestServer {
    pub stream: UnixStream,
}

impl TestServer {
    /// Run the server script on its own thread
    pub fn spawn<F>(mut self, script: F) -> JoinHandle<TestServer>
    where
        F: FnOnce(&mut TestServer) + Send + 'static,
    {
        std::thread::spawn(move || {
            script(&mut self);
            self
        })
    }

    pub fn send(&mut self, msg: Message<u32>) {
        let mut buffer = vec![0u8; 1024];
        let len = write_to_buffers(&msg, &mut buffer).unwrap();
        self.stream.write_all(&buffer[..len]).unwrap();
    }

    pub fn recv(&mut self, signature: &[ArgumentType]) -> Message<u32> {
        let mut buffer = vec![0u8; HEADER_SIZE];
        self.stream.read_exact(&mut buffer).unwrap();
        let (_, _, size) = peek_header(&buffer).unwrap();
        buffer.resize(size, 0);
        self.stream.read_exact(&mut buffer[HEADER_SIZE..]).unwrap();
        let (msg, rest) = parse_message(&buffer, signature).unwrap();
        assert!(rest.is_empty());
        msg
    }

    /// Receive a `wl_display.get_registry` request, returning the registry id
    pub fn recv_get_registry(&mut self) -> u32 {
        let msg = self.recv(GET_REGISTRY_SIG);
        assert_eq!((msg.sender_id, msg.opcode), (DISPLAY, 1));
        match msg.args[..] {
            [Argument::NewId(id)] => id,
            _ => unreachable!(),
        }
    }

    /// Receive a `wl_display.sync` request, returning the callback id
    pub fn recv_sync(&mut self) -> u32 {
        let msg = self.recv(SYNC_SIG);
        assert_eq!((msg.sender_id, msg.opcode), (DISPLAY, 0));
        match msg.args[..] {
            [Argument::NewId(id)] => id,
            _ => unreachable!(),
        }
    }

    /// Fire a callback and acknowledge its destruction
    pub fn done(&mut self, callback: u32, serial: u32) {
        self.send(message!(callback, 0, [Argument::Uint(serial)]));
        self.delete_id(callback);
    }

    /// Answer a `wl_display.sync` request
    pub fn answer_sync(&mut self) -> u32 {
        let callback = self.recv_sync();
        self.done(callback, 0);
        callback
    }

    pub fn delete_id(&mut self, id: u32) {
        self.send(message!(DISPLAY, WL_DISPLAY_DELETE_ID, [Argument::Uint(id)]));
    }

    pub fn error(&mut self, object: u32, code: u32, text: &str) {
        self.send(message!(
            DISPLAY,
            WL_DISPLAY_ERROR,
            [
                Argument::Object(object),
                Argument::Uint(code),
                Argument::Str(Some(Box::new(CString::new(text).unwrap()))),
            ],
        ));
    }

    pub fn global(&mut self, registry: u32, name: u32, interface: &str, version: u32) {
        self.send(message!(
            registry,
            0,
            [
                Argument::Uint(name),
                Argument::Str(Some(Box::new(CString::new(interface).unwrap()))),
                Argument::Uint(version),
            ],
        ));
    }

    pub fn global_remove(&mut self, registry: u32, name: u32) {
        self.send(message!(registry, 1, [Argument::Uint(name)]));
    }
}

/// Collects the events received by a handler
pub fn collector<T: Send + 'static>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/*
 * A test interface, written the way the stub generator writes them
 */

pub static FOO_INTERFACE: Interface = Interface {
    name: "foo_iface",
    version: 3,
    requests: &[
        MessageDesc {
            name: "ping",
            signature: &[ArgumentType::Uint],
            since: 1,
            is_destructor: false,
            child_interface: None,
            arg_interfaces: &[],
        },
        MessageDesc {
            name: "destroy",
            signature: &[],
            since: 1,
            is_destructor: true,
            child_interface: None,
            arg_interfaces: &[],
        },
    ],
    events: &[
        MessageDesc {
            name: "pong",
            signature: &[ArgumentType::Uint],
            since: 1,
            is_destructor: false,
            child_interface: None,
            arg_interfaces: &[],
        },
        MessageDesc {
            name: "spawn",
            signature: &[ArgumentType::NewId],
            since: 1,
            is_destructor: false,
            child_interface: Some(&FOO_INTERFACE),
            arg_interfaces: &[],
        },
    ],
};

#[derive(Debug)]
pub enum FooRequest {
    Ping { value: u32 },
    Destroy,
}

#[derive(Debug)]
pub enum FooEvent {
    Pong { value: u32 },
    Spawn { child: FooIface },
}

#[derive(Debug, Clone)]
pub struct FooIface {
    id: ObjectId,
    version: u32,
    backend: WeakBackend,
}

impl PartialEq for FooIface {
    fn eq(&self, other: &FooIface) -> bool {
        self.id == other.id
    }
}

impl Proxy for FooIface {
    type Request = FooRequest;
    type Event = FooEvent;

    fn interface() -> &'static Interface {
        &FOO_INTERFACE
    }

    fn id(&self) -> ObjectId {
        self.id.clone()
    }

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
        Ok(FooIface { id, version, backend: conn.backend().downgrade() })
    }

    fn parse_event(
        conn: &Connection,
        msg: Message<ObjectId>,
    ) -> Result<(Self, Self::Event), DispatchError> {
        let me = Self::from_id(conn, msg.sender_id.clone())
            .map_err(|_| DispatchError::bad_message::<Self>(&msg))?;
        match (msg.opcode, &msg.args[..]) {
            (0, [Argument::Uint(value)]) => Ok((me, FooEvent::Pong { value: *value })),
            (1, [Argument::NewId(id)]) => {
                let child = Self::from_id(conn, id.clone())
                    .map_err(|_| DispatchError::bad_message::<Self>(&msg))?;
                Ok((me, FooEvent::Spawn { child }))
            }
            _ => Err(DispatchError::bad_message::<Self>(&msg)),
        }
    }

    fn write_request(
        &self,
        _conn: &Connection,
        req: Self::Request,
    ) -> Result<(Message<ObjectId>, Option<(&'static Interface, u32)>), InvalidId> {
        match req {
            FooRequest::Ping { value } => {
                Ok((message!(self.id.clone(), 0, [Argument::Uint(value)]), None))
            }
            FooRequest::Destroy => Ok((message!(self.id.clone(), 1, []), None)),
        }
    }
}
