//! Composable packet- and byte-stream processors.
//!
//! A pipeline is a graph of *nodes* connected by *interfaces*. Each
//! interface is a typed asynchronous channel with a provider side and a
//! user side and one of four shapes (packets or bytes, pushed or pulled):
//!
//! | | push | pull |
//! |---|---|---|
//! | packet | [`PacketPassInterface`] | [`PacketRecvInterface`] |
//! | stream | [`StreamPassInterface`] | [`StreamRecvInterface`] |
//!
//! Exactly one operation may be outstanding per interface; data moves as
//! owned [`Buffer`]s that travel to the provider and come back on
//! completion; every operation and completion crosses through a reactor
//! job, so handler call chains stay flat no matter how deep the pipeline.
//!
//! The nodes here are the framework's standard library: rendezvous and
//! late binding ([`PacketCopier`], connectors), observation
//! ([`PacketPassNotifier`]), buffering ([`SinglePacketBuffer`],
//! [`PacketBuffer`]), packet/stream conversion ([`PacketStreamSender`],
//! [`StreamPacketSender`], PacketProto framing), multiplexing (fair and
//! priority queues), timing ([`PacketPassInactivityMonitor`]),
//! fragmentation (FragmentProto), and socket endpoints.
//!
//! Construction wires interfaces together; a node exclusively owns the
//! interfaces it provides and borrows the ones it consumes. Tear pipelines
//! down leaves-up, dropping a node only when its interfaces are idle (or
//! after the documented teardown affordances such as
//! [`PacketPassFairQueue::prepare_free`]).
//!
//! [`Buffer`]: crate::Buffer

mod connector;
mod copier;
mod datagram;
mod fair_queue;
mod fragment;
mod inactivity;
mod keepalive;
mod notifier;
mod packet_buffer;
mod packet_pass;
mod packet_recv;
mod packet_stream;
mod packetproto;
mod priority_queue;
mod single_buffer;
mod stream_packet;
mod stream_pass;
mod stream_recv;
mod stream_socket;

pub use self::connector::{PacketPassConnector, PacketRecvConnector};
pub use self::copier::PacketCopier;
pub use self::datagram::{
    DatagramSinkError, DatagramSocketSink, DatagramSocketSource, DatagramSourceError,
};
pub use self::fair_queue::{PacketPassFairQueue, PacketPassFairQueueFlow};
pub use self::fragment::{FragmentProtoAssembler, FragmentProtoDisassembler};
pub use self::inactivity::PacketPassInactivityMonitor;
pub use self::keepalive::KeepaliveSource;
pub use self::notifier::PacketPassNotifier;
pub use self::packet_buffer::PacketBuffer;
pub use self::packet_pass::PacketPassInterface;
pub use self::packet_recv::PacketRecvInterface;
pub use self::packet_stream::PacketStreamSender;
pub use self::packetproto::{PacketProtoDecoder, PacketProtoDecoderError, PacketProtoEncoder};
pub use self::priority_queue::{PacketPassPriorityQueue, PacketPassPriorityQueueFlow};
pub use self::single_buffer::SinglePacketBuffer;
pub use self::stream_packet::StreamPacketSender;
pub use self::stream_pass::StreamPassInterface;
pub use self::stream_recv::StreamRecvInterface;
pub use self::stream_socket::{
    StreamSinkError, StreamSocketSink, StreamSocketSource, StreamSourceError,
};
