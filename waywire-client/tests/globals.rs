mod helpers;

use std::ffi::CString;

use helpers::*;

use waywire_backend::{message, protocol::Argument};
use waywire_client::{
    globals::{BindError, Global, GlobalEvent, GlobalList},
    protocol::wl_callback::WlCallback,
    Connection, Proxy,
};

#[test]
fn registry_bind_request() {
    let (conn, mut server) = setup();
    let registry = conn.display().get_registry(|_, _, _| {}).unwrap();
    let foo: FooIface = registry.bind(5, 2, |_, _, _| {}).unwrap();
    conn.flush().unwrap();

    let registry_id = server.recv_get_registry();
    let bind = server.recv(BIND_SIG);
    assert_eq!(
        bind,
        message!(
            registry_id,
            0,
            [
                Argument::Uint(5),
                Argument::Str(Some(Box::new(CString::new("foo_iface").unwrap()))),
                Argument::Uint(2),
                Argument::NewId(foo.id().protocol_id()),
            ],
        )
    );
    assert_eq!(foo.id().protocol_id(), 3);
    assert_eq!(foo.version(), 2);
    assert!(foo.is_alive());
    assert_eq!(conn.object_info(foo.id()).unwrap().interface.name, "foo_iface");
}

// Create a global list, and advertise the given globals to it
fn advertise(globals: &[(u32, &'static str, u32)]) -> (Connection, TestServer, GlobalList) {
    let (conn, server) = setup();
    let events = collector();
    let events2 = events.clone();
    let list = GlobalList::new_with_cb(&conn, move |_, _, event| {
        if let GlobalEvent::New { name, .. } = event {
            events2.lock().unwrap().push(name);
        }
    })
    .unwrap();

    let advertised = globals.to_vec();
    let server = server.spawn(move |server| {
        let registry = server.recv_get_registry();
        let callback = server.recv_sync();
        for (name, interface, version) in advertised {
            server.global(registry, name, interface, version);
        }
        server.done(callback, 0);
    });
    conn.roundtrip().unwrap();
    let server = server.join().unwrap();

    let names: Vec<u32> = globals.iter().map(|g| g.0).collect();
    assert_eq!(*events.lock().unwrap(), names);
    (conn, server, list)
}

#[test]
fn global_list_tracks_globals() {
    let (_conn, _server, list) = advertise(&[(1, "foo_iface", 2), (2, "wl_other", 1)]);
    assert_eq!(
        list.contents(),
        vec![
            Global { name: 1, interface: "foo_iface".into(), version: 2 },
            Global { name: 2, interface: "wl_other".into(), version: 1 },
        ]
    );
}

#[test]
fn global_list_bind_versions() {
    let (conn, mut server, list) = advertise(&[(1, "foo_iface", 2)]);

    // the highest common version is used
    let foo: FooIface = list.bind(1..=3, |_, _, _| {}).unwrap();
    assert_eq!(foo.version(), 2);

    assert_eq!(
        list.bind::<FooIface, _>(3..=3, |_, _, _| {}).unwrap_err(),
        BindError::UnsupportedVersion(2)
    );
    assert_eq!(list.bind::<WlCallback, _>(1..=1, |_, _, _| {}).unwrap_err(), BindError::Missing);

    conn.flush().unwrap();
    // delete_id of the sync callback
    conn.read().unwrap();
    let bind = server.recv(BIND_SIG);
    assert_eq!(bind.args[0], Argument::Uint(1));
    assert_eq!(bind.args[2], Argument::Uint(2));
}

#[test]
#[should_panic]
fn global_list_bind_above_stub_version() {
    let (_conn, _server, list) = advertise(&[(1, "foo_iface", 2)]);
    // foo_iface is known up to version 3
    let _ = list.bind::<FooIface, _>(1..=4, |_, _, _| {});
}

#[test]
fn global_remove_releases_bound_objects() {
    let (conn, server) = setup();
    let events = collector();
    let events2 = events.clone();
    let list = GlobalList::new_with_cb(&conn, move |_, _, event| {
        events2.lock().unwrap().push(event);
    })
    .unwrap();

    let server = server.spawn(|server| {
        let registry = server.recv_get_registry();
        let callback = server.recv_sync();
        server.global(registry, 7, "foo_iface", 3);
        server.done(callback, 0);
    });
    conn.roundtrip().unwrap();
    let mut server = server.join().unwrap();
    // delete_id of the callback
    conn.read().unwrap();

    let pongs = collector();
    let pongs2 = pongs.clone();
    let foo: FooIface = list
        .bind(1..=3, move |_, _, event| {
            if let FooEvent::Pong { value } = event {
                pongs2.lock().unwrap().push(value);
            }
        })
        .unwrap();
    conn.flush().unwrap();
    let registry_id = server.recv(BIND_SIG).sender_id;

    server.send(message!(foo.id().protocol_id(), 0, [Argument::Uint(1)]));
    server.global_remove(registry_id, 7);
    server.send(message!(foo.id().protocol_id(), 0, [Argument::Uint(2)]));
    // removing an unknown global is only logged
    server.global_remove(registry_id, 42);
    assert_eq!(conn.dispatch_pending().unwrap(), 4);

    // the handler was released, the object is still usable
    assert_eq!(*pongs.lock().unwrap(), vec![1]);
    assert!(foo.is_alive());
    assert!(list.contents().is_empty());

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    match &events[1] {
        GlobalEvent::Removed { name, interface, bound } => {
            assert_eq!(*name, 7);
            assert_eq!(interface, "foo_iface");
            assert_eq!(*bound, vec![foo.id()]);
        }
        other => panic!("Unexpected event: {other:?}"),
    }
}

#[test]
fn destroyed_objects_are_not_reported_on_removal() {
    let (conn, server) = setup();
    let events = collector();
    let events2 = events.clone();
    let list = GlobalList::new_with_cb(&conn, move |_, _, event| {
        if let GlobalEvent::Removed { bound, .. } = event {
            events2.lock().unwrap().push(bound);
        }
    })
    .unwrap();

    let server = server.spawn(|server| {
        let registry = server.recv_get_registry();
        let callback = server.recv_sync();
        server.global(registry, 3, "foo_iface", 1);
        server.done(callback, 0);
    });
    conn.roundtrip().unwrap();
    let mut server = server.join().unwrap();
    conn.read().unwrap();

    let first: FooIface = list.bind(1..=1, |_, _, _| {}).unwrap();
    first.send_request(FooRequest::Destroy).unwrap();
    let second: FooIface = list.bind(1..=1, |_, _, _| {}).unwrap();
    assert_ne!(first.id(), second.id());
    conn.flush().unwrap();
    let registry_id = server.recv(BIND_SIG).sender_id;
    server.recv(DESTROY_SIG);
    server.recv(BIND_SIG);

    server.global_remove(registry_id, 3);
    assert_eq!(conn.dispatch_pending().unwrap(), 1);
    assert_eq!(*events.lock().unwrap(), vec![vec![second.id()]]);
}
