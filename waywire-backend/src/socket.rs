//! Wayland socket manipulation

use std::io::{Error as IoError, ErrorKind, IoSliceMut, Result as IoResult};
use std::mem::MaybeUninit;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;

use rustix::event::{poll, PollFd, PollFlags};
use rustix::io::retry_on_intr;
use rustix::net::{recvmsg, send, RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags, SendFlags};

use crate::protocol::{ArgumentType, Message};
use crate::wire::{parse_message, peek_header, write_to_buffers, MessageParseError, MessageWriteError};

/// Maximum number of bytes that can be sent in a single socket message
pub const MAX_BYTES_OUT: usize = 4096;

/// Capacity of the incoming buffer, twice the outgoing one to keep leftover partial messages
pub const MAX_BYTES_IN: usize = 2 * MAX_BYTES_OUT;

// room for the control messages of a peer that sends fds anyway
const MAX_FDS_IN: usize = 28;

/*
 * Socket
 */

/// A wayland socket
#[derive(Debug)]
pub struct Socket {
    stream: UnixStream,
}

impl Socket {
    /// Send some bytes to the socket
    ///
    /// Never blocks, errors with `WouldBlock` if the socket cannot accept data right now.
    pub fn send_msg(&self, bytes: &[u8]) -> IoResult<usize> {
        #[cfg(not(target_os = "macos"))]
        let flags = SendFlags::DONTWAIT | SendFlags::NOSIGNAL;
        #[cfg(target_os = "macos")]
        let flags = SendFlags::DONTWAIT;

        Ok(retry_on_intr(|| send(self, bytes, flags))?)
    }

    /// Receive a single message from the socket
    ///
    /// Return the number of bytes received, `0` meaning the peer closed the connection.
    /// Errors with `WouldBlock` if no message is available.
    ///
    /// File descriptors are not part of this protocol: if the peer attached some to the message
    /// they are closed right away.
    pub fn rcv_msg(&self, buffer: &mut [u8]) -> IoResult<usize> {
        #[cfg(not(target_os = "macos"))]
        let flags = RecvFlags::DONTWAIT | RecvFlags::CMSG_CLOEXEC;
        #[cfg(target_os = "macos")]
        let flags = RecvFlags::DONTWAIT;

        let mut cmsg_space = [MaybeUninit::uninit(); rustix::cmsg_space!(ScmRights(MAX_FDS_IN))];
        let mut cmsg_buffer = RecvAncillaryBuffer::new(&mut cmsg_space);
        let mut iov = [IoSliceMut::new(buffer)];
        let msg = retry_on_intr(|| recvmsg(&self.stream, &mut iov[..], &mut cmsg_buffer, flags))?;

        let dropped = cmsg_buffer
            .drain()
            .filter_map(|cmsg| match cmsg {
                RecvAncillaryMessage::ScmRights(fds) => Some(fds.count()),
                _ => None,
            })
            .sum::<usize>();
        if dropped > 0 {
            log::warn!("Closed {dropped} file descriptors sent by the server.");
        }
        Ok(msg.bytes)
    }

    /// Block until the socket is ready for the given operations
    pub fn wait(&self, flags: PollFlags) -> IoResult<()> {
        let mut fds = [PollFd::new(self, flags | PollFlags::ERR)];
        loop {
            match poll(&mut fds, None) {
                Ok(_) => return Ok(()),
                Err(rustix::io::Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl From<UnixStream> for Socket {
    fn from(stream: UnixStream) -> Self {
        // macOS doesn't have MSG_NOSIGNAL, but has SO_NOSIGPIPE instead
        #[cfg(target_os = "macos")]
        let _ = rustix::net::sockopt::set_socket_nosigpipe(&stream, true);
        Self { stream }
    }
}

impl AsFd for Socket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/*
 * BufferedSocket
 */

/// An adapter around a raw Socket that directly handles buffering and
/// conversion from/to wayland messages
#[derive(Debug)]
pub struct BufferedSocket {
    socket: Socket,
    in_data: Buffer,
    out_data: Buffer,
}

impl BufferedSocket {
    /// Wrap a Socket into a Buffered Socket
    pub fn new(socket: Socket) -> Self {
        Self { socket, in_data: Buffer::new(MAX_BYTES_IN), out_data: Buffer::new(MAX_BYTES_OUT) }
    }

    /// Flush the contents of the outgoing buffer into the socket
    ///
    /// Errors with `WouldBlock` if the socket could not take everything, in which case the
    /// unsent bytes stay in the buffer.
    pub fn flush(&mut self) -> IoResult<()> {
        let bytes = self.out_data.get_contents();
        let mut written_bytes = 0;
        let mut ret = Ok(());
        while written_bytes < bytes.len() {
            match self.socket.send_msg(&bytes[written_bytes..]) {
                // a non-empty send never returns 0
                Ok(0) => break,
                Ok(count) => written_bytes += count,
                Err(error) => {
                    ret = Err(error);
                    break;
                }
            }
        }
        self.out_data.offset(written_bytes);
        self.out_data.move_to_front();
        ret
    }

    /// Flush the whole outgoing buffer, waiting for the socket to be writable as needed
    pub fn flush_blocking(&mut self) -> IoResult<()> {
        loop {
            match self.flush() {
                Err(e) if e.kind() == ErrorKind::WouldBlock => self.socket.wait(PollFlags::OUT)?,
                other => return other,
            }
        }
    }

    // attempts to write a message in the out buffer, returns false if there is not enough room
    fn attempt_write_message(&mut self, msg: &Message<u32>) -> IoResult<bool> {
        match write_to_buffers(msg, self.out_data.get_writable_storage()) {
            Ok(bytes_out) => {
                self.out_data.advance(bytes_out);
                Ok(true)
            }
            Err(MessageWriteError::BufferTooSmall) => Ok(false),
            Err(e @ MessageWriteError::FdUnsupported) => Err(IoError::new(ErrorKind::Unsupported, e)),
        }
    }

    /// Write a message to the outgoing buffer
    ///
    /// This method flushes the internal buffer if it is full, blocking until the socket
    /// accepted its contents. A message too big to fit in an empty buffer is an `E2BIG` error.
    pub fn write_message(&mut self, msg: &Message<u32>) -> IoResult<()> {
        if !self.attempt_write_message(msg)? {
            self.flush_blocking()?;
            if !self.attempt_write_message(msg)? {
                return Err(rustix::io::Errno::TOOBIG.into());
            }
        }
        Ok(())
    }

    /// Try to fill the incoming buffer of this socket, to prepare
    /// a new round of parsing.
    ///
    /// Errors with `WouldBlock` if no data is available, and with `EPIPE` if the peer
    /// closed the connection.
    pub fn fill_incoming_buffers(&mut self) -> IoResult<()> {
        self.in_data.move_to_front();
        let in_bytes = {
            let bytes = self.in_data.get_writable_storage();
            if bytes.is_empty() {
                // the buffer holds an incomplete message filling all of it
                return Err(IoError::new(ErrorKind::InvalidData, "incoming message too large"));
            }
            self.socket.rcv_msg(bytes)?
        };
        if in_bytes == 0 {
            // the other end of the socket was closed
            return Err(rustix::io::Errno::PIPE.into());
        }
        self.in_data.advance(in_bytes);
        Ok(())
    }

    /// Fill the incoming buffer, waiting until the socket has data to read
    pub fn fill_incoming_buffers_blocking(&mut self) -> IoResult<()> {
        loop {
            match self.fill_incoming_buffers() {
                Err(e) if e.kind() == ErrorKind::WouldBlock => self.socket.wait(PollFlags::IN)?,
                other => return other,
            }
        }
    }

    /// Read and deserialize a single message from the incoming buffer
    ///
    /// This method requires one closure that given an object id and an opcode,
    /// must provide the signature of the associated request/event, in the form of
    /// a `&'static [ArgumentType]`.
    ///
    /// Errors with `MissingData` if the buffer does not contain a whole message yet. A message
    /// that could never fit in the buffer, or whose target has no known signature, is
    /// `Malformed`.
    pub fn read_one_message<F>(&mut self, mut signature: F) -> Result<Message<u32>, MessageParseError>
    where
        F: FnMut(u32, u16) -> Option<&'static [ArgumentType]>,
    {
        let (msg, read_data) = {
            let data = self.in_data.get_contents();
            let (object_id, opcode, size) = peek_header(data).ok_or(MessageParseError::MissingData)?;
            if size > MAX_BYTES_IN {
                return Err(MessageParseError::Malformed);
            }
            let sig = signature(object_id, opcode).ok_or(MessageParseError::Malformed)?;
            let (msg, rest_data) = parse_message(data, sig)?;
            (msg, data.len() - rest_data.len())
        };

        self.in_data.offset(read_data);

        Ok(msg)
    }

    /// Check whether the incoming buffer starts with a complete message
    pub fn has_full_message(&self) -> bool {
        let data = self.in_data.get_contents();
        matches!(peek_header(data), Some((_, _, size)) if size <= data.len())
    }
}

impl AsRawFd for BufferedSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl AsFd for BufferedSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

/*
 * Buffer
 */
#[derive(Debug)]
struct Buffer {
    storage: Vec<u8>,
    occupied: usize,
    offset: usize,
}

impl Buffer {
    fn new(size: usize) -> Self {
        Self { storage: vec![0; size], occupied: 0, offset: 0 }
    }

    /// Advance the internal counter of occupied space
    fn advance(&mut self, bytes: usize) {
        self.occupied += bytes;
    }

    /// Advance the read offset of current occupied space
    fn offset(&mut self, bytes: usize) {
        self.offset += bytes;
    }

    /// Get the current contents of the occupied space of the buffer
    fn get_contents(&self) -> &[u8] {
        &self.storage[(self.offset)..(self.occupied)]
    }

    /// Get mutable access to the unoccupied space of the buffer
    fn get_writable_storage(&mut self) -> &mut [u8] {
        &mut self.storage[(self.occupied)..]
    }

    /// Move the unread contents of the buffer to the front, to ensure
    /// maximal write space availability
    fn move_to_front(&mut self) {
        if self.occupied > self.offset {
            self.storage.copy_within((self.offset)..(self.occupied), 0)
        }
        self.occupied -= self.offset;
        self.offset = 0;
    }
}
