//! Length-prefix framing over a byte stream.
//!
//! PacketProto frames are a 2-byte little-endian length followed by that
//! many payload bytes. The encoder and decoder below carry packets over
//! stream transports (TCP, TLS, pipes); see [`proto::packetproto`] for the
//! wire definitions.
//!
//! [`proto::packetproto`]: crate::proto::packetproto

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use log::warn;

use crate::debug::ErrorLatch;
use crate::flow::{PacketPassInterface, PacketRecvInterface, StreamRecvInterface};
use crate::proto::packetproto;
use crate::{Buffer, Handle};

/// Prepends the length header to each packet.
///
/// A pull-to-pull adapter: the output [`PacketRecvInterface`] yields
/// encoded frames, each produced by receiving one packet from the given
/// input directly into the output buffer after a placeholder header, then
/// patching the header in. Zero-length packets encode as a bare header.
pub struct PacketProtoEncoder {
    output: PacketRecvInterface,
    #[allow(dead_code)]
    state: Rc<RefCell<EncoderState>>,
}

struct EncoderState {
    input: PacketRecvInterface,
    output: Option<PacketRecvInterface>,
    // Filled length of the output buffer before the header.
    base: usize,
}

impl PacketProtoEncoder {
    pub fn new(handle: &Handle, input: &PacketRecvInterface) -> PacketProtoEncoder {
        assert!(input.mtu() <= packetproto::MAX_PAYLOAD, "input MTU too large");

        let state = Rc::new(RefCell::new(EncoderState {
            input: input.clone(),
            output: None,
            base: 0,
        }));

        let output = PacketRecvInterface::new(handle, packetproto::encoded_len(input.mtu()), {
            let weak = Rc::downgrade(&state);
            move |buf| encoder_output_recv(&weak, buf)
        });
        input.init_receiver({
            let weak = Rc::downgrade(&state);
            move |buf, len| encoder_input_done(&weak, buf, len)
        });
        state.borrow_mut().output = Some(output.clone());

        PacketProtoEncoder { output, state }
    }

    pub fn output(&self) -> &PacketRecvInterface {
        &self.output
    }
}

fn encoder_output_recv(weak: &Weak<RefCell<EncoderState>>, mut buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.base = buf.len();
    // Reserve the header; the bytes are patched once the length is known.
    buf.append(&[0; packetproto::HEADER_LEN]);
    let input = s.input.clone();
    drop(s);
    input.recv(buf);
}

fn encoder_input_done(weak: &Weak<RefCell<EncoderState>>, mut buf: Buffer, len: usize) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow_mut();
    let base = s.base;
    packetproto::write_header(len, &mut buf.filled_mut()[base..base + packetproto::HEADER_LEN]);
    let output = s.output.clone().expect("not wired");
    drop(s);
    output.done(buf, packetproto::encoded_len(len));
}

/// Errors a [`PacketProtoDecoder`] reports.
#[derive(Debug, PartialEq, Eq)]
pub enum PacketProtoDecoderError {
    /// A frame header declared a length above the output MTU. The stream
    /// cannot be resynchronised; the decoder must be dropped.
    PacketTooLong,
}

impl fmt::Display for PacketProtoDecoderError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketProtoDecoderError::PacketTooLong => write!(fmt, "framed packet too long"),
        }
    }
}

impl std::error::Error for PacketProtoDecoderError {}

/// Extracts length-prefixed packets from a byte stream.
///
/// Consumes bytes from a [`StreamRecvInterface`] into a working buffer
/// sized `header + MTU`, passing each complete packet to the given
/// [`PacketPassInterface`] output. Works with any chunking of the stream,
/// down to one byte at a time. A declared length above the output MTU is a
/// fatal protocol error reported through the error handler; the owner must
/// drop the decoder.
///
/// Receiving starts at construction.
pub struct PacketProtoDecoder {
    state: Rc<RefCell<DecoderState>>,
}

struct DecoderState {
    input: StreamRecvInterface,
    output: PacketPassInterface,
    mtu: usize,
    // Working buffer; `None` while a receive is in flight.
    buf: Option<Buffer>,
    // Outgoing packet buffer; `None` while a send is in flight.
    send_buf: Option<Buffer>,
    reset_pending: bool,
    on_error: Option<Box<dyn FnMut(PacketProtoDecoderError)>>,
    latch: ErrorLatch,
}

impl PacketProtoDecoder {
    pub fn new<F>(
        handle: &Handle,
        input: &StreamRecvInterface,
        output: &PacketPassInterface,
        on_error: F,
    ) -> PacketProtoDecoder
    where
        F: FnMut(PacketProtoDecoderError) + 'static,
    {
        let _ = handle;
        let mtu = output.mtu().min(packetproto::MAX_PAYLOAD);

        let state = Rc::new(RefCell::new(DecoderState {
            input: input.clone(),
            output: output.clone(),
            mtu,
            buf: Some(Buffer::with_capacity(packetproto::encoded_len(mtu))),
            send_buf: Some(Buffer::with_capacity(mtu)),
            reset_pending: false,
            on_error: Some(Box::new(on_error)),
            latch: ErrorLatch::new(),
        }));

        input.init_receiver({
            let weak = Rc::downgrade(&state);
            move |buf, _len| decoder_input_done(&weak, buf)
        });
        output.init_sender({
            let weak = Rc::downgrade(&state);
            move |buf| decoder_output_done(&weak, buf)
        });

        {
            let mut s = state.borrow_mut();
            let buf = s.buf.take().expect("buffer missing");
            let input = s.input.clone();
            drop(s);
            input.recv(buf);
        }

        PacketProtoDecoder { state }
    }

    /// Discards buffered partial input. Extraction resumes at the next
    /// byte received.
    pub fn reset(&self) {
        let mut s = self.state.borrow_mut();
        match s.buf.as_mut() {
            Some(buf) => buf.clear(),
            // A receive is in flight; discard when it completes.
            None => s.reset_pending = true,
        }
    }
}

fn decoder_input_done(weak: &Weak<RefCell<DecoderState>>, buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.latch.check();
    s.buf = Some(buf);
    if s.reset_pending {
        s.reset_pending = false;
        s.buf.as_mut().expect("buffer missing").clear();
    }
    process(s);
}

fn decoder_output_done(weak: &Weak<RefCell<DecoderState>>, mut buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.latch.check();
    buf.clear();
    s.send_buf = Some(buf);
    process(s);
}

/// Extracts one packet if a complete frame is buffered, otherwise receives
/// more input. Exactly one downstream operation runs at a time.
fn process(mut s: std::cell::RefMut<'_, DecoderState>) {
    let mut buf = s.buf.take().expect("buffer missing");

    if let Some(payload_len) = packetproto::parse_header(buf.bytes()) {
        if payload_len > s.mtu {
            warn!(
                "framed packet of {} bytes exceeds MTU of {}",
                payload_len, s.mtu
            );
            s.latch.set();
            s.buf = Some(buf);
            let mut handler = s.on_error.take().expect("error handler missing");
            drop(s);
            handler(PacketProtoDecoderError::PacketTooLong);
            return;
        }
        if buf.len() >= packetproto::HEADER_LEN + payload_len {
            buf.advance(packetproto::HEADER_LEN);
            let mut send_buf = s.send_buf.take().expect("send in flight");
            send_buf.append(&buf.bytes()[..payload_len]);
            buf.advance(payload_len);
            s.buf = Some(buf);
            let output = s.output.clone();
            drop(s);
            output.send(send_buf);
            return;
        }
    }

    // Not enough buffered; wrap if the write space ran out, then receive.
    if buf.spare_len() == 0 {
        buf.compact();
    }
    debug_assert!(buf.spare_len() > 0);
    let input = s.input.clone();
    drop(s);
    input.recv(buf);
}
