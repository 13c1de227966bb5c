//! Fragmenting arbitrary-size frames over a fixed-MTU carrier.
//!
//! The disassembler cuts frames into chunks and packs as many chunks as fit
//! into each carrier packet, so small frames share a carrier and large
//! frames span several. The assembler reverses this, accepting chunks in
//! any order. See [`proto::fragmentproto`] for the chunk header layout.
//!
//! [`proto::fragmentproto`]: crate::proto::fragmentproto

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, warn};

use crate::flow::{PacketPassInterface, PacketRecvInterface};
use crate::proto::fragmentproto::{ChunkHeader, HEADER_LEN};
use crate::{Buffer, Handle, Timer};

/// Encodes frames into carrier packets of chunks.
///
/// Input is a [`PacketPassInterface`] of frames (MTU at most `u16::MAX`);
/// output is a [`PacketRecvInterface`] of carrier packets. A single carrier
/// may hold chunks of several consecutive frames.
///
/// The `latency` knob controls what happens when input runs dry while a
/// carrier is partially filled: `Some(d)` holds the carrier up to `d` for
/// more input, `None` emits partial carriers immediately. Frames are given
/// ascending 16-bit ids, wrapping around.
///
/// `chunk_mtu` optionally caps the payload of a single chunk below what
/// the carrier would allow.
pub struct FragmentProtoDisassembler {
    input: PacketPassInterface,
    output: PacketRecvInterface,
    #[allow(dead_code)]
    state: Rc<RefCell<DisState>>,
}

struct DisState {
    input: Option<PacketPassInterface>,
    output: Option<PacketRecvInterface>,
    timer: Option<Timer>,
    in_pkt: Option<Buffer>,
    in_used: usize,
    out_buf: Option<Buffer>,
    out_base: usize,
    chunk_mtu: Option<usize>,
    frame_id: u16,
}

impl FragmentProtoDisassembler {
    pub fn new(
        handle: &Handle,
        frame_mtu: usize,
        carrier_mtu: usize,
        chunk_mtu: Option<usize>,
        latency: Option<Duration>,
    ) -> FragmentProtoDisassembler {
        assert!(frame_mtu <= u16::MAX as usize, "frame MTU exceeds u16 range");
        assert!(carrier_mtu > HEADER_LEN, "carrier MTU too small for a chunk");
        if let Some(chunk_mtu) = chunk_mtu {
            assert!(chunk_mtu > 0, "chunk MTU must be positive");
        }

        let state = Rc::new(RefCell::new(DisState {
            input: None,
            output: None,
            timer: None,
            in_pkt: None,
            in_used: 0,
            out_buf: None,
            out_base: 0,
            chunk_mtu,
            frame_id: 0,
        }));

        let input = PacketPassInterface::new(handle, frame_mtu, {
            let weak = Rc::downgrade(&state);
            move |packet| dis_input_send(&weak, packet)
        });
        let output = PacketRecvInterface::new(handle, carrier_mtu, {
            let weak = Rc::downgrade(&state);
            move |buf| dis_output_recv(&weak, buf)
        });
        let timer = latency.map(|latency| {
            Timer::new(handle, latency, {
                let weak = Rc::downgrade(&state);
                move || dis_timer_fired(&weak)
            })
        });

        {
            let mut s = state.borrow_mut();
            s.input = Some(input.clone());
            s.output = Some(output.clone());
            s.timer = timer;
        }

        FragmentProtoDisassembler {
            input,
            output,
            state,
        }
    }

    /// The frame input.
    pub fn input(&self) -> &PacketPassInterface {
        &self.input
    }

    /// The carrier output.
    pub fn output(&self) -> &PacketRecvInterface {
        &self.output
    }
}

fn dis_input_send(weak: &Weak<RefCell<DisState>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    debug_assert!(s.in_pkt.is_none());
    s.in_pkt = Some(packet);
    s.in_used = 0;
    dis_work(&mut s);
}

fn dis_output_recv(weak: &Weak<RefCell<DisState>>, buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    debug_assert!(s.out_buf.is_none());
    s.out_base = buf.len();
    s.out_buf = Some(buf);
    dis_work(&mut s);
}

fn dis_timer_fired(weak: &Weak<RefCell<DisState>>) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    if s.out_buf.as_ref().map_or(false, |out| out.len() > s.out_base) {
        dis_flush(&mut s);
    }
}

/// Packs chunks while both a frame and a carrier are available, then
/// decides whether the carrier is emitted now, held for the latency
/// window, or left open.
fn dis_work(s: &mut DisState) {
    while s.out_buf.is_some() && s.in_pkt.is_some() {
        let mut out = s.out_buf.take().expect("carrier missing");
        let in_pkt = s.in_pkt.take().expect("frame missing");
        let remaining = in_pkt.len() - s.in_used;
        let space = out.spare_len();

        let fits_zero = remaining == 0 && space >= HEADER_LEN;
        if space < HEADER_LEN + 1 && !fits_zero {
            s.in_pkt = Some(in_pkt);
            s.out_buf = Some(out);
            dis_flush(s);
            return;
        }

        let mut chunk_len = remaining.min(space - HEADER_LEN);
        if let Some(chunk_mtu) = s.chunk_mtu {
            chunk_len = chunk_len.min(chunk_mtu);
        }
        let is_last = chunk_len == remaining;

        let header = ChunkHeader {
            frame_id: s.frame_id,
            chunk_start: s.in_used as u16,
            chunk_len: chunk_len as u16,
            is_last,
        };
        let mut raw = [0u8; HEADER_LEN];
        header.write(&mut raw);
        out.append(&raw);
        out.append(&in_pkt.bytes()[s.in_used..s.in_used + chunk_len]);
        s.out_buf = Some(out);

        if is_last {
            s.frame_id = s.frame_id.wrapping_add(1);
            s.in_used = 0;
            s.input.as_ref().expect("not wired").done(in_pkt);
        } else {
            s.in_used += chunk_len;
            s.in_pkt = Some(in_pkt);
        }
    }

    // Input ran dry with a partially filled carrier: emit it now, or hold
    // it for the latency window.
    if s.in_pkt.is_none() {
        let has_data = s
            .out_buf
            .as_ref()
            .map_or(false, |out| out.len() > s.out_base);
        if has_data {
            match &s.timer {
                None => dis_flush(s),
                Some(timer) => {
                    if !timer.is_set() {
                        timer.set();
                    }
                }
            }
        }
    }
}

fn dis_flush(s: &mut DisState) {
    if let Some(timer) = &s.timer {
        timer.unset();
    }
    let out = s.out_buf.take().expect("carrier missing");
    let len = out.len() - s.out_base;
    s.output.as_ref().expect("not wired").done(out, len);
}

/// Reassembles frames from carrier packets of chunks.
///
/// Input is a [`PacketPassInterface`] of carrier packets; reassembled
/// frames are sent to the given output, whose MTU bounds the frame size.
/// Chunks of a frame may arrive in any order across carriers; a frame is
/// emitted once its last chunk has arrived and every byte is present.
///
/// A table of `num_frames` in-progress frames is kept; when a chunk for an
/// unknown frame id arrives with the table full, the stalest entry is
/// evicted. Malformed chunks are logged and skipped along with the rest of
/// their carrier; inconsistent frames (out-of-bounds or overlapping
/// chunks) are logged and dropped. The carrier source keeps running either
/// way; a lossy carrier makes frame loss ordinary here.
pub struct FragmentProtoAssembler {
    input: PacketPassInterface,
    #[allow(dead_code)]
    state: Rc<RefCell<AsmState>>,
}

struct AsmState {
    input: Option<PacketPassInterface>,
    output: PacketPassInterface,
    frames: Vec<FrameSlot>,
    // Frame being sent downstream; `None` while the send is in flight.
    emit_buf: Option<Buffer>,
    // Carrier parked while a frame send is in flight.
    carrier: Option<Buffer>,
    age_seq: u64,
}

struct FrameSlot {
    id: Option<u16>,
    data: Box<[u8]>,
    received: usize,
    total: Option<usize>,
    age: u64,
}

impl FragmentProtoAssembler {
    pub fn new(
        handle: &Handle,
        carrier_mtu: usize,
        output: &PacketPassInterface,
        num_frames: usize,
    ) -> FragmentProtoAssembler {
        let frame_mtu = output.mtu();
        assert!(frame_mtu <= u16::MAX as usize, "frame MTU exceeds u16 range");
        assert!(num_frames > 0, "need at least one frame slot");

        let frames = (0..num_frames)
            .map(|_| FrameSlot {
                id: None,
                data: vec![0; frame_mtu].into_boxed_slice(),
                received: 0,
                total: None,
                age: 0,
            })
            .collect();

        let state = Rc::new(RefCell::new(AsmState {
            input: None,
            output: output.clone(),
            frames,
            emit_buf: Some(Buffer::with_capacity(frame_mtu)),
            carrier: None,
            age_seq: 0,
        }));

        let input = PacketPassInterface::new(handle, carrier_mtu, {
            let weak = Rc::downgrade(&state);
            move |packet| asm_input_send(&weak, packet)
        });
        output.init_sender({
            let weak = Rc::downgrade(&state);
            move |buf| asm_output_done(&weak, buf)
        });
        state.borrow_mut().input = Some(input.clone());

        FragmentProtoAssembler { input, state }
    }

    /// The carrier input.
    pub fn input(&self) -> &PacketPassInterface {
        &self.input
    }
}

fn asm_input_send(weak: &Weak<RefCell<AsmState>>, carrier: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    debug_assert!(s.carrier.is_none());
    s.carrier = Some(carrier);
    asm_process(&mut s);
}

fn asm_output_done(weak: &Weak<RefCell<AsmState>>, mut buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    buf.clear();
    s.emit_buf = Some(buf);
    asm_process(&mut s);
}

/// Consumes chunks from the parked carrier, emitting at most one frame per
/// call; parsing resumes when the emission completes.
fn asm_process(s: &mut AsmState) {
    while s.emit_buf.is_some() {
        let Some(mut carrier) = s.carrier.take() else {
            return;
        };

        if carrier.is_empty() {
            s.input.as_ref().expect("not wired").done(carrier);
            return;
        }

        let Some(header) = ChunkHeader::parse(carrier.bytes()) else {
            warn!("truncated chunk header ({} trailing bytes)", carrier.len());
            let junk = carrier.len();
            carrier.advance(junk);
            s.input.as_ref().expect("not wired").done(carrier);
            return;
        };
        let chunk_len = usize::from(header.chunk_len);
        if carrier.len() < HEADER_LEN + chunk_len {
            warn!(
                "chunk payload of {} bytes extends past the carrier",
                chunk_len
            );
            let junk = carrier.len();
            carrier.advance(junk);
            s.input.as_ref().expect("not wired").done(carrier);
            return;
        }
        carrier.advance(HEADER_LEN);

        let completed = {
            let payload = &carrier.bytes()[..chunk_len];
            asm_add_chunk(s, &header, payload)
        };
        carrier.advance(chunk_len);
        s.carrier = Some(carrier);

        if let Some(slot) = completed {
            let total = s.frames[slot].total.expect("completed frame without total");
            let mut emit = s.emit_buf.take().expect("emit buffer in flight");
            emit.append(&s.frames[slot].data[..total]);
            asm_reset_slot(&mut s.frames[slot]);
            s.output.send(emit);
        }
    }
}

/// Files a chunk into the frame table. Returns the slot index when the
/// chunk completes its frame.
fn asm_add_chunk(s: &mut AsmState, header: &ChunkHeader, payload: &[u8]) -> Option<usize> {
    let start = usize::from(header.chunk_start);
    let len = payload.len();

    let slot = match s.frames.iter().position(|f| f.id == Some(header.frame_id)) {
        Some(slot) => slot,
        None => {
            let slot = match s.frames.iter().position(|f| f.id.is_none()) {
                Some(free) => free,
                None => {
                    let stalest = s
                        .frames
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, f)| f.age)
                        .map(|(i, _)| i)
                        .expect("frame table empty");
                    debug!(
                        "evicting incomplete frame {:?} for frame {}",
                        s.frames[stalest].id, header.frame_id
                    );
                    stalest
                }
            };
            asm_reset_slot(&mut s.frames[slot]);
            s.frames[slot].id = Some(header.frame_id);
            slot
        }
    };

    s.age_seq = s.age_seq.wrapping_add(1);
    let age_seq = s.age_seq;
    let frame = &mut s.frames[slot];
    frame.age = age_seq;

    if start + len > frame.data.len() {
        warn!("chunk past frame MTU, dropping frame {}", header.frame_id);
        asm_reset_slot(frame);
        return None;
    }
    if header.is_last && frame.total.is_some() {
        warn!("duplicate last chunk, dropping frame {}", header.frame_id);
        asm_reset_slot(frame);
        return None;
    }

    frame.data[start..start + len].copy_from_slice(payload);
    frame.received += len;
    if header.is_last {
        frame.total = Some(start + len);
    }

    if let Some(total) = frame.total {
        if frame.received > total {
            warn!(
                "overlapping chunks in frame {}, dropping it",
                header.frame_id
            );
            asm_reset_slot(frame);
            return None;
        }
        if frame.received == total {
            return Some(slot);
        }
    }
    None
}

fn asm_reset_slot(slot: &mut FrameSlot) {
    slot.id = None;
    slot.received = 0;
    slot.total = None;
}
