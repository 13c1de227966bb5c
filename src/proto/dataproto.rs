//! DataProto: the mesh datapath header.
//!
//! A DataProto packet is a fixed header, a list of destination peer ids,
//! and the carried frame:
//!
//! ```text
//! u8  flags
//! u16 from_id
//! u16 num_peer_ids
//! u16 peer_ids[num_peer_ids]
//! u8  frame[...]
//! ```

/// Length of the fixed header before the peer-id list.
pub const HEADER_LEN: usize = 5;

/// A peer identifier.
pub type PeerId = u16;

/// The fixed part of a DataProto header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub flags: u8,
    pub from_id: PeerId,
    pub num_peer_ids: u16,
}

/// Encoded size of a packet carrying `num_peer_ids` ids and a frame of
/// `frame_len` bytes.
pub const fn encoded_len(num_peer_ids: usize, frame_len: usize) -> usize {
    HEADER_LEN + 2 * num_peer_ids + frame_len
}

/// Writes a header and peer-id list into `dst`, returning the number of
/// bytes written.
pub fn write_header(flags: u8, from_id: PeerId, peer_ids: &[PeerId], dst: &mut [u8]) -> usize {
    dst[0] = flags;
    dst[1..3].copy_from_slice(&from_id.to_le_bytes());
    dst[3..5].copy_from_slice(&(peer_ids.len() as u16).to_le_bytes());
    let mut at = HEADER_LEN;
    for peer_id in peer_ids {
        dst[at..at + 2].copy_from_slice(&peer_id.to_le_bytes());
        at += 2;
    }
    at
}

/// Parses a packet into its header, peer ids, and the offset where the
/// frame begins. `None` if the buffer is too short for its own id list.
pub fn parse(src: &[u8]) -> Option<(Header, Vec<PeerId>, usize)> {
    if src.len() < HEADER_LEN {
        return None;
    }
    let header = Header {
        flags: src[0],
        from_id: u16::from_le_bytes([src[1], src[2]]),
        num_peer_ids: u16::from_le_bytes([src[3], src[4]]),
    };
    let ids_end = HEADER_LEN + 2 * usize::from(header.num_peer_ids);
    if src.len() < ids_end {
        return None;
    }
    let peer_ids = src[HEADER_LEN..ids_end]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Some((header, peer_ids, ids_end))
}

#[cfg(test)]
mod tests {
    use super::{encoded_len, parse, write_header};

    #[test]
    fn round_trip() {
        let mut raw = vec![0u8; encoded_len(2, 3)];
        let frame_at = write_header(0x01, 7, &[10, 20], &mut raw);
        raw[frame_at..].copy_from_slice(b"abc");

        let (header, peer_ids, offset) = parse(&raw).unwrap();
        assert_eq!(header.flags, 0x01);
        assert_eq!(header.from_id, 7);
        assert_eq!(header.num_peer_ids, 2);
        assert_eq!(peer_ids, vec![10, 20]);
        assert_eq!(&raw[offset..], b"abc");
    }

    #[test]
    fn truncated_id_list() {
        let mut raw = vec![0u8; encoded_len(2, 0)];
        write_header(0, 1, &[2, 3], &mut raw);
        assert!(parse(&raw[..6]).is_none());
    }
}
