use waywire_client::{globals::GlobalList, Connection};

/// Print the globals advertised by the server, and the ones it removes until interrupted
fn main() {
    env_logger::init();

    let conn = Connection::connect_to_env().unwrap();

    let globals = GlobalList::new_with_cb(&conn, |_, _, event| {
        eprintln!("{event:?}");
    })
    .unwrap();

    conn.roundtrip().unwrap();
    println!("{} globals advertised:", globals.contents().len());
    for global in globals.contents() {
        println!("[{}] {} (v{})", global.name, global.interface, global.version);
    }

    loop {
        conn.read().unwrap();
    }
}
