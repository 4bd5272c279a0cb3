//! Debugging helpers to handle `WAYLAND_DEBUG` env variable.

use std::{
    fmt::Display,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::protocol::Argument;

/// The `WAYLAND_DEBUG` env variable is set to debug client.
pub fn has_debug_client_env() -> bool {
    matches!(std::env::var_os("WAYLAND_DEBUG"), Some(str) if str == "1" || str == "client")
}

/// Print the dispatched message to stderr in a following format:
///
/// `[timestamp] <- interface@id.msg_name(args)`
pub fn print_dispatched_message<Id: Display>(
    interface: &str,
    id: u32,
    msg_name: &str,
    args: &[Argument<Id>],
) {
    print_timestamp();
    eprintln!(" <- {}", format_message(interface, id, msg_name, args));
}

/// Print the send message to stderr in a following format:
///
/// `[timestamp] -> interface@id.msg_name(args)`
pub fn print_send_message<Id: Display>(
    interface: &str,
    id: u32,
    msg_name: &str,
    args: &[Argument<Id>],
    discarded: bool,
) {
    print_timestamp();
    if discarded {
        eprint!("[discarded]");
    }
    eprintln!(" -> {}", format_message(interface, id, msg_name, args));
}

pub(crate) fn format_message<Id: Display>(
    interface: &str,
    id: u32,
    msg_name: &str,
    args: &[Argument<Id>],
) -> String {
    format!("{}@{}.{}({})", interface, id, msg_name, DisplaySlice(args))
}

pub(crate) struct DisplaySlice<'a, D>(pub &'a [D]);

impl<D: Display> Display for DisplaySlice<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut it = self.0.iter();
        if let Some(val) = it.next() {
            write!(f, "{val}")?;
        }
        for val in it {
            write!(f, ", {val}")?;
        }
        Ok(())
    }
}

/// Print timestamp in seconds.milliseconds format, the way libwayland does.
fn print_timestamp() {
    if let Ok(timestamp) = SystemTime::now().duration_since(UNIX_EPOCH) {
        let time = (timestamp.as_secs() * 1000000 + timestamp.subsec_nanos() as u64 / 1000) as u32;
        eprint!("[{:7}.{:03}][waywire]", time / 1000, time % 1000);
    }
}
