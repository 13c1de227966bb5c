//! Datagram socket adapters.
//!
//! These adapt one half-duplex direction of a datagram (or seqpacket)
//! socket to the packet interfaces. Sends and receives are attempted
//! synchronously; would-block parks the operation and waits for readiness.
//! Any other failure is reported once through the error handler and the
//! adapter is dead; the owner must drop it.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use crate::debug::ErrorLatch;
use crate::flow::{PacketPassInterface, PacketRecvInterface};
use crate::net::{Direction, Socket};
use crate::sys;
use crate::{Buffer, Handle, Readiness};

/// Errors a [`DatagramSocketSink`] reports.
#[derive(Debug)]
pub enum DatagramSinkError {
    /// The OS accepted fewer bytes than the packet held.
    WrongSize,
    /// The send failed.
    Io(io::Error),
}

impl fmt::Display for DatagramSinkError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatagramSinkError::WrongSize => write!(fmt, "datagram sent partially"),
            DatagramSinkError::Io(err) => write!(fmt, "send failed: {}", err),
        }
    }
}

impl std::error::Error for DatagramSinkError {}

/// Packet sink writing each packet as one datagram.
///
/// Provides a [`PacketPassInterface`] input. With a remote address each
/// packet goes out via `sendto`; without one the socket must be connected
/// (or be a seqpacket socket) and plain `send` is used. The packet is
/// completed before any error is reported, so the pipeline above stays
/// consistent.
pub struct DatagramSocketSink {
    input: PacketPassInterface,
    state: Rc<RefCell<SinkState>>,
}

struct SinkState {
    socket: Socket,
    input: Option<PacketPassInterface>,
    remote: Option<SocketAddr>,
    packet: Option<Buffer>,
    on_error: Option<Box<dyn FnMut(DatagramSinkError)>>,
    latch: ErrorLatch,
}

impl DatagramSocketSink {
    /// Attaches to the write direction of `socket`. `remote` is the
    /// destination for `sendto`, or `None` for connected-mode `send`.
    pub fn new<F>(
        handle: &Handle,
        socket: &Socket,
        mtu: usize,
        remote: Option<SocketAddr>,
        on_error: F,
    ) -> DatagramSocketSink
    where
        F: FnMut(DatagramSinkError) + 'static,
    {
        let state = Rc::new(RefCell::new(SinkState {
            socket: socket.clone(),
            input: None,
            remote,
            packet: None,
            on_error: Some(Box::new(on_error)),
            latch: ErrorLatch::new(),
        }));

        socket.add_handler(Direction::Write, {
            let weak = Rc::downgrade(&state);
            move |readiness| sink_writable(&weak, readiness)
        });

        let input = PacketPassInterface::new(handle, mtu, {
            let weak = Rc::downgrade(&state);
            move |packet| sink_send(&weak, packet)
        });
        state.borrow_mut().input = Some(input.clone());

        DatagramSocketSink { input, state }
    }

    pub fn input(&self) -> &PacketPassInterface {
        &self.input
    }

    /// Changes the destination address for subsequent packets.
    pub fn set_remote(&self, remote: Option<SocketAddr>) {
        self.state.borrow_mut().remote = remote;
    }
}

impl Drop for DatagramSocketSink {
    fn drop(&mut self) {
        let socket = self.state.borrow().socket.clone();
        socket.remove_handler(Direction::Write);
    }
}

fn sink_send(weak: &Weak<RefCell<SinkState>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.latch.check();
    debug_assert!(s.packet.is_none());
    s.packet = Some(packet);
    sink_try_send(s);
}

fn sink_writable(weak: &Weak<RefCell<SinkState>>, _readiness: Readiness) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow_mut();
    debug_assert!(s.packet.is_some());
    s.socket.disable(Direction::Write);
    sink_try_send(s);
}

fn sink_try_send(mut s: std::cell::RefMut<'_, SinkState>) {
    let packet = s.packet.as_ref().expect("no packet to send");
    let fd = s.socket.as_raw_fd();
    let res = match &s.remote {
        Some(addr) => sys::net::sendto(fd, packet.bytes(), addr),
        None => sys::net::send(fd, packet.bytes()),
    };

    if let Err(err) = &res {
        if err.kind() == io::ErrorKind::WouldBlock {
            s.socket.enable(Direction::Write);
            return;
        }
    }

    // Complete the packet first; the error, if any, is reported after.
    let packet = s.packet.take().expect("no packet to send");
    let sent_len = packet.len();
    let input = s.input.clone().expect("not wired");
    let error = match res {
        Ok(n) if n != sent_len => Some(DatagramSinkError::WrongSize),
        Ok(_) => None,
        Err(err) => Some(DatagramSinkError::Io(err)),
    };
    if error.is_some() {
        s.latch.set();
    }
    let handler = error.as_ref().map(|_| s.on_error.take().expect("error handler missing"));
    drop(s);
    input.done(packet);
    if let (Some(error), Some(mut handler)) = (error, handler) {
        handler(error);
    }
}

/// Errors a [`DatagramSocketSource`] reports.
#[derive(Debug)]
pub enum DatagramSourceError {
    /// The receive failed.
    Io(io::Error),
}

impl fmt::Display for DatagramSourceError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatagramSourceError::Io(err) => write!(fmt, "receive failed: {}", err),
        }
    }
}

impl std::error::Error for DatagramSourceError {}

/// Packet source reading one datagram per receive.
///
/// Provides a [`PacketRecvInterface`] output. Each completed receive
/// records the peer address, available through [`last_remote`]. A
/// zero-length datagram is a legal zero-length packet, not an end of
/// stream.
///
/// [`last_remote`]: DatagramSocketSource::last_remote
pub struct DatagramSocketSource {
    output: PacketRecvInterface,
    state: Rc<RefCell<SourceState>>,
}

struct SourceState {
    socket: Socket,
    output: Option<PacketRecvInterface>,
    buf: Option<Buffer>,
    last_remote: Option<SocketAddr>,
    on_error: Option<Box<dyn FnMut(DatagramSourceError)>>,
    latch: ErrorLatch,
}

impl DatagramSocketSource {
    /// Attaches to the read direction of `socket`. Datagrams longer than
    /// `mtu` are truncated by the OS.
    pub fn new<F>(handle: &Handle, socket: &Socket, mtu: usize, on_error: F) -> DatagramSocketSource
    where
        F: FnMut(DatagramSourceError) + 'static,
    {
        let state = Rc::new(RefCell::new(SourceState {
            socket: socket.clone(),
            output: None,
            buf: None,
            last_remote: None,
            on_error: Some(Box::new(on_error)),
            latch: ErrorLatch::new(),
        }));

        socket.add_handler(Direction::Read, {
            let weak = Rc::downgrade(&state);
            move |readiness| source_readable(&weak, readiness)
        });

        let output = PacketRecvInterface::new(handle, mtu, {
            let weak = Rc::downgrade(&state);
            move |buf| source_recv(&weak, buf)
        });
        state.borrow_mut().output = Some(output.clone());

        DatagramSocketSource { output, state }
    }

    pub fn output(&self) -> &PacketRecvInterface {
        &self.output
    }

    /// Peer address of the most recently received datagram.
    pub fn last_remote(&self) -> Option<SocketAddr> {
        self.state.borrow().last_remote
    }
}

impl Drop for DatagramSocketSource {
    fn drop(&mut self) {
        let socket = self.state.borrow().socket.clone();
        socket.remove_handler(Direction::Read);
    }
}

fn source_recv(weak: &Weak<RefCell<SourceState>>, buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.latch.check();
    debug_assert!(s.buf.is_none());
    s.buf = Some(buf);
    source_try_recv(s);
}

fn source_readable(weak: &Weak<RefCell<SourceState>>, _readiness: Readiness) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow_mut();
    debug_assert!(s.buf.is_some());
    s.socket.disable(Direction::Read);
    source_try_recv(s);
}

fn source_try_recv(mut s: std::cell::RefMut<'_, SourceState>) {
    let mtu = s.output.as_ref().expect("not wired").mtu();
    let fd = s.socket.as_raw_fd();
    let buf = s.buf.as_mut().expect("no receive in flight");
    let res = {
        let spare = buf.spare_mut();
        sys::net::recvfrom(fd, &mut spare[..mtu])
    };

    match res {
        Ok((n, addr)) => {
            let mut buf = s.buf.take().expect("no receive in flight");
            buf.add_len(n);
            s.last_remote = addr;
            let output = s.output.clone().expect("not wired");
            drop(s);
            output.done(buf, n);
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            s.socket.enable(Direction::Read);
        }
        Err(err) => {
            s.latch.set();
            let mut handler = s.on_error.take().expect("error handler missing");
            drop(s);
            handler(DatagramSourceError::Io(err));
        }
    }
}
