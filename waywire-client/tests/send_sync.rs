mod helpers;

use helpers::*;

use waywire_backend::{message, protocol::Argument};
use waywire_client::{
    protocol::{wl_callback, wl_registry},
    Proxy,
};

#[test]
fn roundtrip_waits_for_done() {
    let (conn, server) = setup();

    let server = server.spawn(|server| {
        let callback = server.recv_sync();
        assert_eq!(callback, 2);
        server.done(callback, 0);
    });

    // stops at the done event
    assert_eq!(conn.roundtrip().unwrap(), 1);
    let _server = server.join().unwrap();
    // the delete_id that follows
    conn.read().unwrap();
    assert_eq!(conn.dispatch_pending().unwrap(), 0);
}

#[test]
fn roundtrip_dispatches_preceding_events() {
    let (conn, server) = setup();
    let globals = collector();
    let globals2 = globals.clone();
    let _registry = conn
        .display()
        .get_registry(move |_, _, event| {
            globals2.lock().unwrap().push(format!("{event:?}"));
        })
        .unwrap();

    let server = server.spawn(|server| {
        let registry = server.recv_get_registry();
        let callback = server.recv_sync();
        server.global(registry, 1, "wl_compositor", 4);
        server.global(registry, 2, "wl_shm", 1);
        server.done(callback, 0);
    });

    assert_eq!(conn.roundtrip().unwrap(), 3);
    let _server = server.join().unwrap();
    assert_eq!(
        *globals.lock().unwrap(),
        vec![
            "Global { name: 1, interface: \"wl_compositor\", version: 4 }".to_owned(),
            "Global { name: 2, interface: \"wl_shm\", version: 1 }".to_owned(),
        ]
    );
}

#[test]
fn callback_ids_are_reused_after_delete_id() {
    let (conn, server) = setup();

    let server = server.spawn(|server| {
        for _ in 0..3 {
            assert_eq!(server.answer_sync(), 2);
        }
    });

    for _ in 0..3 {
        conn.roundtrip().unwrap();
        // without the delete_id the next callback would get a fresh id
        conn.read().unwrap();
    }
    let _server = server.join().unwrap();
}

#[test]
fn sync_handler_gets_the_serial() {
    let (conn, mut server) = setup();
    let serials = collector();
    let serials2 = serials.clone();
    let callback = conn
        .display()
        .sync(move |_, _, event| {
            if let wl_callback::Event::Done { callback_data } = event {
                serials2.lock().unwrap().push(callback_data);
            }
        })
        .unwrap();
    conn.flush().unwrap();

    let callback_id = server.recv_sync();
    assert_eq!(callback.id().protocol_id(), callback_id);

    server.send(message!(callback_id, 0, [Argument::Uint(1234)]));
    conn.read().unwrap();
    assert_eq!(*serials.lock().unwrap(), vec![1234]);
    // destroyed by the done event, the id is pending the server acknowledgment
    assert!(!callback.is_alive());
    assert!(conn.lookup(callback_id).is_err());

    server.delete_id(callback_id);
    conn.read().unwrap();
    let next = conn.display().sync(|_, _, _| {}).unwrap();
    assert_eq!(next.id().protocol_id(), callback_id);
}

#[test]
fn roundtrip_from_a_handler() {
    let (conn, server) = setup();
    let names = collector();
    let names2 = names.clone();
    let inner_dispatched = collector();
    let inner_dispatched2 = inner_dispatched.clone();
    let _registry = conn
        .display()
        .get_registry(move |conn, _, event| {
            if let wl_registry::Event::Global { name, .. } = event {
                names2.lock().unwrap().push(name);
                if name == 1 {
                    // the second global arrives while this handler runs
                    inner_dispatched2.lock().unwrap().push(conn.roundtrip().unwrap());
                }
            }
        })
        .unwrap();
    conn.flush().unwrap();

    let server = server.spawn(|server| {
        let registry = server.recv_get_registry();
        server.global(registry, 1, "wl_compositor", 4);
        server.global(registry, 2, "wl_shm", 1);
        let callback = server.recv_sync();
        server.done(callback, 0);
    });

    conn.read().unwrap();
    let _server = server.join().unwrap();
    // the queued global is handled once the handler returns
    assert_eq!(*inner_dispatched.lock().unwrap(), vec![2]);
    assert_eq!(*names.lock().unwrap(), vec![1, 2]);
}
