//! Wire-format definitions and codecs.
//!
//! All multi-byte integers on the wire are little-endian. These modules
//! hold the plain data layouts; the flow nodes in [`crate::flow`] move them
//! through pipelines.

pub mod dataproto;
pub mod fragmentproto;
pub mod packetproto;
pub mod scproto;
