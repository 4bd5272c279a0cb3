#![no_main]
use libfuzzer_sys::fuzz_target;

use waywire_backend::protocol::{AllowNull, ArgumentType};
use waywire_backend::wire::parse_message;

fn get_arg_types(data: &[u8]) -> Vec<ArgumentType> {
    use ArgumentType::*;

    data.iter()
        .map(|b| match b & 0b1111 {
            0 => Int,
            1 => Uint,
            2 => Fixed,
            3 => Str(AllowNull::No),
            4 => Str(AllowNull::Yes),
            5 => Object(AllowNull::No),
            6 => Object(AllowNull::Yes),
            7 => NewId,
            8 => Array,
            9 => Fd,
            _ => Uint,
        })
        .collect()
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }
    // up to 16 `ArgumentType`s, the rest is the message stream
    let count = (data[0] & 0b1111) as usize;
    let args = get_arg_types(&data[1..1 + count]);
    let mut stream = &data[16..];
    while let Ok((_msg, rest)) = parse_message(stream, &args) {
        assert!(rest.len() < stream.len());
        stream = rest;
    }
});
