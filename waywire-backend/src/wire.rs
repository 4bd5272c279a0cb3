//! Types and routines used to manipulate arguments from the wire format
//!
//! Every message starts with an 8 bytes header: the id of the target object, then a word
//! holding the total size of the message in bytes (header included) in its upper 16 bits and
//! the opcode in its lower 16 bits. Arguments follow, each aligned on 4 bytes. All words are in
//! host byte order.

use std::ffi::CStr;

use smallvec::SmallVec;

use crate::protocol::{AllowNull, Argument, ArgumentType, Message};

/// Size of the header of every message, in bytes
pub const HEADER_SIZE: usize = 8;

/// Largest message size that can be expressed in the 16 bits size field, in bytes
pub const MAX_MESSAGE_SIZE: usize = 0xFFFC;

/// Error generated when trying to serialize a message into buffers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageWriteError {
    /// The buffer is too small to hold the message contents
    BufferTooSmall,
    /// The message contains a file descriptor, which this runtime cannot send
    FdUnsupported,
}

impl std::error::Error for MessageWriteError {}

impl std::fmt::Display for MessageWriteError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> Result<(), ::std::fmt::Error> {
        match self {
            Self::BufferTooSmall => {
                f.write_str("The provided buffer is too small to hold message content.")
            }
            Self::FdUnsupported => {
                f.write_str("The message contains a file descriptor, fd passing is not supported.")
            }
        }
    }
}

/// Error generated when trying to deserialize a message from buffers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageParseError {
    /// More data is needed to deserialize the message
    MissingData,
    /// The message is malformed and cannot be parsed
    Malformed,
    /// The signature of the message contains a file descriptor, which this runtime cannot receive
    FdUnsupported,
}

impl std::error::Error for MessageParseError {}

impl std::fmt::Display for MessageParseError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> Result<(), ::std::fmt::Error> {
        match *self {
            Self::MissingData => f.write_str("More data is needed to deserialize the message"),
            Self::Malformed => f.write_str("The message is malformed and cannot be parsed"),
            Self::FdUnsupported => {
                f.write_str("The message carries a file descriptor, fd passing is not supported")
            }
        }
    }
}

/// Length of a string or array payload once padded to the next multiple of 4
#[inline]
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Read the target object id and the opcode from the header at the start of `data`
///
/// Returns `None` if `data` does not hold a full header.
pub fn peek_header(data: &[u8]) -> Option<(u32, u16, usize)> {
    let (object_id, rest) = split_word(data)?;
    let (word_2, _) = split_word(rest)?;
    Some((object_id, (word_2 & 0x0000_FFFF) as u16, (word_2 >> 16) as usize))
}

/// Serialize the contents of this message into the provided buffer
///
/// Returns the number of bytes written, which is always a multiple of 4.
pub fn write_to_buffers(msg: &Message<u32>, payload: &mut [u8]) -> Result<usize, MessageWriteError> {
    // Helper function to write a word in the buffer
    fn write_word(word: u32, payload: &mut [u8], offset: &mut usize) -> Result<(), MessageWriteError> {
        let end = *offset + 4;
        let slot = payload.get_mut(*offset..end).ok_or(MessageWriteError::BufferTooSmall)?;
        slot.copy_from_slice(&word.to_ne_bytes());
        *offset = end;
        Ok(())
    }

    // Helper function to write byte arrays in payload, with their size header and padding
    fn write_array(array: &[u8], payload: &mut [u8], offset: &mut usize) -> Result<(), MessageWriteError> {
        let padded = padded_len(array.len());
        // need enough space to store the whole array with padding and a size header
        if payload.len() < *offset + 4 + padded {
            return Err(MessageWriteError::BufferTooSmall);
        }
        write_word(array.len() as u32, payload, offset)?;
        let start = *offset;
        payload[start..start + array.len()].copy_from_slice(array);
        payload[start + array.len()..start + padded].fill(0);
        *offset = start + padded;
        Ok(())
    }

    let limit = payload.len().min(MAX_MESSAGE_SIZE);
    let payload = &mut payload[..limit];
    if payload.len() < HEADER_SIZE {
        return Err(MessageWriteError::BufferTooSmall);
    }

    let mut offset = HEADER_SIZE;
    for arg in &msg.args {
        match *arg {
            Argument::Int(i) => write_word(i as u32, payload, &mut offset)?,
            Argument::Uint(u) => write_word(u, payload, &mut offset)?,
            Argument::Fixed(f) => write_word(f as u32, payload, &mut offset)?,
            Argument::Str(Some(ref s)) => write_array(s.as_bytes_with_nul(), payload, &mut offset)?,
            Argument::Str(None) => write_array(&[], payload, &mut offset)?,
            Argument::Object(o) => write_word(o, payload, &mut offset)?,
            Argument::NewId(n) => write_word(n, payload, &mut offset)?,
            Argument::Array(ref a) => write_array(a, payload, &mut offset)?,
            // fds would travel in the ancillary data and take no room here
            Argument::Fd(_) => return Err(MessageWriteError::FdUnsupported),
        }
    }

    let mut header = 0;
    write_word(msg.sender_id, payload, &mut header)?;
    write_word(((offset as u32) << 16) | u32::from(msg.opcode), payload, &mut header)?;
    Ok(offset)
}

/// Attempts to parse a single message with the given signature.
///
/// If the buffer contains several messages, only the first one will be parsed,
/// and the unused tail of the buffer is returned. If a single message was present,
/// the returned slice should thus be empty.
///
/// Errors with `MissingData` if the buffer does not contain a whole message yet, and with
/// `Malformed` if the message does not match the signature.
pub fn parse_message<'a>(
    raw: &'a [u8],
    signature: &[ArgumentType],
) -> Result<(Message<u32>, &'a [u8]), MessageParseError> {
    // helper function to read arrays, returns the content without padding
    fn read_array(array_len: usize, payload: &[u8]) -> Result<(&[u8], &[u8]), MessageParseError> {
        let padded = padded_len(array_len);
        if padded > payload.len() {
            return Err(MessageParseError::Malformed);
        }
        let (array_contents, rest) = payload.split_at(padded);
        Ok((&array_contents[..array_len], rest))
    }

    let (sender_id, opcode, len) = peek_header(raw).ok_or(MessageParseError::MissingData)?;

    if len < HEADER_SIZE || len % 4 != 0 {
        return Err(MessageParseError::Malformed);
    } else if len > raw.len() {
        return Err(MessageParseError::MissingData);
    }

    let (message, rest) = raw.split_at(len);
    let mut payload = &message[HEADER_SIZE..];

    let mut args = SmallVec::with_capacity(signature.len());
    for argtype in signature.iter().copied() {
        if let ArgumentType::Fd = argtype {
            return Err(MessageParseError::FdUnsupported);
        }
        // the whole message is available, running short means the signature does not match
        let (front, mut tail) = split_word(payload).ok_or(MessageParseError::Malformed)?;
        let arg = match argtype {
            ArgumentType::Int => Argument::Int(front as i32),
            ArgumentType::Uint => Argument::Uint(front),
            ArgumentType::Fixed => Argument::Fixed(front as i32),
            ArgumentType::Str(allow_null) => {
                if front == 0 {
                    if allow_null == AllowNull::No {
                        return Err(MessageParseError::Malformed);
                    }
                    Argument::Str(None)
                } else {
                    let (bytes, rest) = read_array(front as usize, tail)?;
                    tail = rest;
                    let s = CStr::from_bytes_with_nul(bytes)
                        .map_err(|_| MessageParseError::Malformed)?;
                    Argument::Str(Some(Box::new(s.into())))
                }
            }
            ArgumentType::Object(_) => Argument::Object(front),
            ArgumentType::NewId => Argument::NewId(front),
            ArgumentType::Array => {
                let (bytes, rest) = read_array(front as usize, tail)?;
                tail = rest;
                Argument::Array(Box::new(bytes.into()))
            }
            ArgumentType::Fd => unreachable!(),
        };
        args.push(arg);
        payload = tail;
    }

    if !payload.is_empty() {
        // the message is longer than what its signature describes
        return Err(MessageParseError::Malformed);
    }

    Ok((Message { sender_id, opcode, args }, rest))
}

#[inline]
fn split_word(data: &[u8]) -> Option<(u32, &[u8])> {
    if data.len() < 4 {
        return None;
    }
    let (word, rest) = data.split_at(4);
    Some((u32::from_ne_bytes([word[0], word[1], word[2], word[3]]), rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{fixed_from_f64, fixed_to_f64};
    use smallvec::smallvec;
    use std::ffi::CString;

    fn words(data: &[u8]) -> Vec<u32> {
        data.chunks(4).map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]])).collect()
    }

    fn string(s: &str) -> Argument<u32> {
        Argument::Str(Some(Box::new(CString::new(s).unwrap())))
    }

    #[test]
    fn into_from_raw_cycle() {
        let mut bytes_buffer = vec![0; 1024];

        let msg = Message {
            sender_id: 42,
            opcode: 7,
            args: smallvec![
                Argument::Uint(3),
                Argument::Fixed(-89),
                string("I like trains!"),
                Argument::Array(vec![1, 2, 3, 4, 5, 6, 7, 8, 9].into()),
                Argument::Object(88),
                Argument::NewId(56),
                Argument::Int(-25),
            ],
        };
        // write the message to the buffer
        let len = write_to_buffers(&msg, &mut bytes_buffer[..]).unwrap();
        // read it back
        let (rebuilt, rest) = parse_message(
            &bytes_buffer[..len],
            &[
                ArgumentType::Uint,
                ArgumentType::Fixed,
                ArgumentType::Str(AllowNull::No),
                ArgumentType::Array,
                ArgumentType::Object(AllowNull::No),
                ArgumentType::NewId,
                ArgumentType::Int,
            ],
        )
        .unwrap();
        assert_eq!(rebuilt, msg);
        assert!(rest.is_empty());
    }

    #[test]
    fn exact_layout() {
        let mut buffer = [0u8; 64];
        let msg = Message {
            sender_id: 2,
            opcode: 0,
            args: smallvec![Argument::Uint(5), string("foo_iface"), Argument::Uint(2), Argument::NewId(3)],
        };
        let len = write_to_buffers(&msg, &mut buffer).unwrap();
        // header + name + (len + "foo_iface\0" padded to 12) + version + new_id
        assert_eq!(len, 8 + 4 + 4 + 12 + 4 + 4);
        let w = words(&buffer[..len]);
        assert_eq!(w[0], 2);
        assert_eq!(w[1], 36 << 16);
        assert_eq!(w[2], 5);
        assert_eq!(w[3], 10);
        assert_eq!(&buffer[16..26], b"foo_iface\0");
        assert_eq!(&buffer[26..28], &[0, 0]);
        assert_eq!(w[7], 2);
        assert_eq!(w[8], 3);
    }

    #[test]
    fn strings_and_arrays_are_padded() {
        let mut buffer = [0xFFu8; 128];
        for n in 0..13 {
            let text = "x".repeat(n);
            let msg = Message {
                sender_id: 1,
                opcode: 0,
                args: smallvec![string(&text), Argument::Array(vec![7; n].into())],
            };
            let len = write_to_buffers(&msg, &mut buffer).unwrap();
            assert_eq!(len % 4, 0);
            assert_eq!(len, HEADER_SIZE + 4 + padded_len(n + 1) + 4 + padded_len(n));
            // string length prefix counts the trailing NUL
            assert_eq!(words(&buffer[8..12])[0] as usize, n + 1);
            // padding bytes are zeroed
            let string_end = 12 + n + 1;
            assert!(buffer[string_end..12 + padded_len(n + 1)].iter().all(|&b| b == 0));

            let (parsed, _) = parse_message(
                &buffer[..len],
                &[ArgumentType::Str(AllowNull::No), ArgumentType::Array],
            )
            .unwrap();
            assert_eq!(parsed, msg);
        }
    }

    #[test]
    fn null_string() {
        let mut buffer = [0u8; 32];
        let msg = Message { sender_id: 4, opcode: 1, args: smallvec![Argument::Str(None)] };
        let len = write_to_buffers(&msg, &mut buffer).unwrap();
        assert_eq!(len, 12);
        assert_eq!(words(&buffer[8..12])[0], 0);
        let (parsed, _) = parse_message(&buffer[..len], &[ArgumentType::Str(AllowNull::Yes)]).unwrap();
        assert_eq!(parsed.args[0], Argument::Str(None));
        // a null string where the signature forbids it is a protocol violation
        assert_eq!(
            parse_message(&buffer[..len], &[ArgumentType::Str(AllowNull::No)]).unwrap_err(),
            MessageParseError::Malformed
        );
    }

    #[test]
    fn fixed_round_trip() {
        let mut buffer = [0u8; 16];
        for &value in &[0.0, 1.5, -1.5, 120.003_906_25, -0.25] {
            let msg =
                Message { sender_id: 9, opcode: 3, args: smallvec![Argument::Fixed(fixed_from_f64(value))] };
            let len = write_to_buffers(&msg, &mut buffer).unwrap();
            let (parsed, _) = parse_message(&buffer[..len], &[ArgumentType::Fixed]).unwrap();
            match parsed.args[0] {
                Argument::Fixed(raw) => assert!((fixed_to_f64(raw) - value).abs() <= 1.0 / 256.0),
                ref other => panic!("unexpected argument {other:?}"),
            }
        }
    }

    #[test]
    fn fd_is_rejected() {
        let mut buffer = [0u8; 32];
        let msg = Message { sender_id: 3, opcode: 0, args: smallvec![Argument::Uint(1), Argument::Fd(0)] };
        assert_eq!(write_to_buffers(&msg, &mut buffer), Err(MessageWriteError::FdUnsupported));

        let msg = Message { sender_id: 3, opcode: 0, args: smallvec![Argument::Uint(1)] };
        let len = write_to_buffers(&msg, &mut buffer).unwrap();
        assert_eq!(
            parse_message(&buffer[..len], &[ArgumentType::Uint, ArgumentType::Fd]).unwrap_err(),
            MessageParseError::FdUnsupported
        );
    }

    #[test]
    fn buffer_too_small() {
        let mut buffer = [0u8; 12];
        let msg = Message { sender_id: 3, opcode: 0, args: smallvec![string("too long for this")] };
        assert_eq!(write_to_buffers(&msg, &mut buffer), Err(MessageWriteError::BufferTooSmall));
        assert_eq!(write_to_buffers(&msg, &mut buffer[..4]), Err(MessageWriteError::BufferTooSmall));
    }

    #[test]
    fn partial_and_malformed_messages() {
        let mut buffer = [0u8; 64];
        let msg = Message { sender_id: 1, opcode: 1, args: smallvec![Argument::Uint(12), Argument::Int(-1)] };
        let len = write_to_buffers(&msg, &mut buffer).unwrap();
        let sig = [ArgumentType::Uint, ArgumentType::Int];

        // truncated header or body
        assert_eq!(parse_message(&buffer[..4], &sig).unwrap_err(), MessageParseError::MissingData);
        assert_eq!(parse_message(&buffer[..len - 4], &sig).unwrap_err(), MessageParseError::MissingData);
        // signature longer than the message
        assert_eq!(
            parse_message(&buffer[..len], &[ArgumentType::Uint, ArgumentType::Int, ArgumentType::Uint])
                .unwrap_err(),
            MessageParseError::Malformed
        );
        // signature shorter than the message
        assert_eq!(
            parse_message(&buffer[..len], &[ArgumentType::Uint]).unwrap_err(),
            MessageParseError::Malformed
        );
        // size field not aligned
        let mut bad = buffer;
        bad[4..8].copy_from_slice(&((15u32 << 16) | 1).to_ne_bytes());
        assert_eq!(parse_message(&bad[..len], &sig).unwrap_err(), MessageParseError::Malformed);
        // size field smaller than the header
        bad[4..8].copy_from_slice(&((4u32 << 16) | 1).to_ne_bytes());
        assert_eq!(parse_message(&bad[..len], &sig).unwrap_err(), MessageParseError::Malformed);
    }

    #[test]
    fn string_without_terminator() {
        let mut buffer = [0u8; 32];
        let msg = Message {
            sender_id: 1,
            opcode: 0,
            args: smallvec![Argument::Array(b"abcd".to_vec().into())],
        };
        let len = write_to_buffers(&msg, &mut buffer).unwrap();
        // an array with no trailing NUL cannot be read back as a string
        assert_eq!(
            parse_message(&buffer[..len], &[ArgumentType::Str(AllowNull::No)]).unwrap_err(),
            MessageParseError::Malformed
        );
    }

    #[test]
    fn several_messages_in_one_buffer() {
        let mut buffer = [0u8; 64];
        let first = Message { sender_id: 3, opcode: 0, args: smallvec![Argument::Uint(1)] };
        let second = Message { sender_id: 4, opcode: 2, args: smallvec![string("abc")] };
        let len1 = write_to_buffers(&first, &mut buffer).unwrap();
        let len2 = write_to_buffers(&second, &mut buffer[len1..]).unwrap();

        let (parsed, rest) = parse_message(&buffer[..len1 + len2], &[ArgumentType::Uint]).unwrap();
        assert_eq!(parsed, first);
        assert_eq!(rest.len(), len2);
        assert_eq!(peek_header(rest), Some((4, 2, len2)));
        let (parsed, rest) = parse_message(rest, &[ArgumentType::Str(AllowNull::No)]).unwrap();
        assert_eq!(parsed, second);
        assert!(rest.is_empty());
    }
}
