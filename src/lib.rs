//! Cooperative packet and stream pipelines over non-blocking I/O.
//!
//! flowio composes packet- and byte-stream processors into pipelines
//! driven by a single-threaded event [`Reactor`]. A pipeline is a graph of
//! flow nodes connected by four interface kinds (packets or bytes, pushed
//! or pulled); control flow is cooperative, with exactly one operation
//! outstanding per interface direction and every operation and completion
//! routed through the reactor's pending-job queue.
//!
//! The building blocks:
//!
//! * [`Reactor`]: timers, file-descriptor readiness and deferred jobs in
//!   one event loop; [`Handle`], [`Pending`], [`Timer`], [`FdWatcher`].
//! * [`flow`]: the interfaces and the node library of copiers, connectors,
//!   notifiers, buffers, framers, fair and priority queues, inactivity
//!   monitoring, fragmentation, socket sources and sinks.
//! * [`net`]: non-blocking socket registration shared by the adapters.
//! * [`proto`]: the wire formats (PacketProto, FragmentProto, DataProto,
//!   SCProto).
//! * [`EventLock`], [`threadwork`], [`UnixSignals`]: cooperative mutual
//!   exclusion, a worker-thread boundary, and signal delivery.
//!
//! # Example
//!
//! A pipeline that length-frames packets and pumps them through an
//! in-memory rendezvous:
//!
//! ```
//! use flowio::flow::{PacketCopier, PacketProtoEncoder, SinglePacketBuffer};
//! use flowio::flow::PacketPassInterface;
//! use flowio::{Buffer, Reactor};
//!
//! let mut reactor = Reactor::new().unwrap();
//! let handle = reactor.handle();
//!
//! // Packets pushed into the copier come out of its pull side, get a
//! // 2-byte length prefix, and land in the sink.
//! let copier = PacketCopier::new(&handle, 16);
//! let encoder = PacketProtoEncoder::new(&handle, copier.output());
//!
//! let quit = handle.clone();
//! let sink = PacketPassInterface::new(&handle, 18, move |packet| {
//!     assert_eq!(packet.bytes(), [0x02, 0x00, 0xAB, 0xCD]);
//!     quit.quit(0);
//!     // A real sink would complete with `sink.done(packet)` here.
//! });
//! let _pump = SinglePacketBuffer::new(&handle, encoder.output(), &sink);
//!
//! copier.input().init_sender(|_packet| {});
//! copier.input().send(Buffer::from_slice(&[0xAB, 0xCD]));
//!
//! assert_eq!(reactor.run().unwrap(), 0);
//! ```
//!
//! # Scheduling model
//!
//! Everything attached to a reactor runs on the reactor's thread; there is
//! no locking. A handler runs to completion and yields by leaving work on
//! a job, timer or watcher. The only sanctioned preemption is the
//! [`threadwork`] dispatcher, whose work functions run on worker threads
//! while completions are marshalled back into the reactor.
//!
//! Contract violations (two operations in flight, payload past the MTU,
//! completing an idle interface) are bugs, caught by assertions. OS
//! failures surface as [`std::io::Error`] from constructors, and
//! peer-level failures (closed streams, oversize frames) reach the error
//! callback installed on the node that saw them.

#![cfg(unix)]
#![warn(missing_docs)]
#![allow(clippy::type_complexity)]

mod buffer;
pub mod debug;
mod event_lock;
mod fd;
pub mod flow;
pub mod net;
mod pending;
pub mod proto;
mod reactor;
mod readiness;
mod signals;
mod slab;
mod sys;
pub mod threadwork;
mod timer;

pub use buffer::Buffer;
pub use event_lock::{EventLock, EventLockJob};
pub use fd::FdWatcher;
pub use pending::Pending;
pub use reactor::{Handle, Reactor};
pub use readiness::Readiness;
pub use signals::UnixSignals;
pub use timer::Timer;
