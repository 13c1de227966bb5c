//! SCProto: the client-server control protocol.
//!
//! Every packet is a one-byte type header followed by a type-dependent
//! payload. A client starts with `ClientHello`; the server answers with
//! `ServerHello` and keeps both sides' peer knowledge in sync with
//! `NewClient`/`EndClient`. Peers exchange messages by relaying `OutMsg`
//! packets, delivered as `InMsg`. A keepalive is the bare header.

/// Protocol version carried in the hello exchange.
pub const VERSION: u16 = 26;

/// How often keepalives are sent, in milliseconds.
pub const KEEPALIVE_INTERVAL_MS: u64 = 10_000;

/// Length of the type header.
pub const HEADER_LEN: usize = 1;

/// Largest payload following the header.
pub const MAX_PAYLOAD: usize = 2000;

/// Largest full packet.
pub const MAX_ENC: usize = HEADER_LEN + MAX_PAYLOAD;

/// A peer identifier.
pub type PeerId = u16;

pub const MSG_KEEPALIVE: u8 = 0;
pub const MSG_CLIENTHELLO: u8 = 1;
pub const MSG_SERVERHELLO: u8 = 2;
pub const MSG_NEWCLIENT: u8 = 3;
pub const MSG_ENDCLIENT: u8 = 4;
pub const MSG_OUTMSG: u8 = 5;
pub const MSG_INMSG: u8 = 6;

/// `NewClient` flag: frames may be relayed to other peers through this
/// peer.
pub const NEWCLIENT_FLAG_RELAY_SERVER: u16 = 1;
/// `NewClient` flag: this peer must be allowed to relay frames through us.
pub const NEWCLIENT_FLAG_RELAY_CLIENT: u16 = 2;

/// Largest message payload relayed between peers.
pub const MAX_MSGLEN: usize = MAX_PAYLOAD - 2;

/// `ClientHello` payload: the version the client speaks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClientHello {
    pub version: u16,
}

impl ClientHello {
    pub const LEN: usize = 2;

    pub fn parse(src: &[u8]) -> Option<ClientHello> {
        if src.len() < Self::LEN {
            return None;
        }
        Some(ClientHello {
            version: u16::from_le_bytes([src[0], src[1]]),
        })
    }

    pub fn write(&self, dst: &mut [u8]) {
        dst[0..2].copy_from_slice(&self.version.to_le_bytes());
    }
}

/// `ServerHello` payload: the client's assigned id and its IPv4 address as
/// the server sees it (network byte order, zero if not applicable).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ServerHello {
    pub flags: u16,
    pub id: PeerId,
    pub client_addr: u32,
}

impl ServerHello {
    pub const LEN: usize = 8;

    pub fn parse(src: &[u8]) -> Option<ServerHello> {
        if src.len() < Self::LEN {
            return None;
        }
        Some(ServerHello {
            flags: u16::from_le_bytes([src[0], src[1]]),
            id: u16::from_le_bytes([src[2], src[3]]),
            client_addr: u32::from_be_bytes([src[4], src[5], src[6], src[7]]),
        })
    }

    pub fn write(&self, dst: &mut [u8]) {
        dst[0..2].copy_from_slice(&self.flags.to_le_bytes());
        dst[2..4].copy_from_slice(&self.id.to_le_bytes());
        dst[4..8].copy_from_slice(&self.client_addr.to_be_bytes());
    }
}

/// `NewClient` payload: a peer joined. When the server uses TLS, the
/// peer's DER certificate follows.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NewClient {
    pub id: PeerId,
    pub flags: u16,
}

impl NewClient {
    pub const LEN: usize = 4;

    pub fn parse(src: &[u8]) -> Option<NewClient> {
        if src.len() < Self::LEN {
            return None;
        }
        Some(NewClient {
            id: u16::from_le_bytes([src[0], src[1]]),
            flags: u16::from_le_bytes([src[2], src[3]]),
        })
    }

    pub fn write(&self, dst: &mut [u8]) {
        dst[0..2].copy_from_slice(&self.id.to_le_bytes());
        dst[2..4].copy_from_slice(&self.flags.to_le_bytes());
    }
}

/// `EndClient` payload: a peer left.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndClient {
    pub id: PeerId,
}

impl EndClient {
    pub const LEN: usize = 2;

    pub fn parse(src: &[u8]) -> Option<EndClient> {
        if src.len() < Self::LEN {
            return None;
        }
        Some(EndClient {
            id: u16::from_le_bytes([src[0], src[1]]),
        })
    }

    pub fn write(&self, dst: &mut [u8]) {
        dst[0..2].copy_from_slice(&self.id.to_le_bytes());
    }
}

/// `OutMsg` header: client-to-server, destination peer id; the message
/// payload follows.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutMsg {
    pub peer_id: PeerId,
}

impl OutMsg {
    pub const LEN: usize = 2;

    pub fn parse(src: &[u8]) -> Option<OutMsg> {
        if src.len() < Self::LEN {
            return None;
        }
        Some(OutMsg {
            peer_id: u16::from_le_bytes([src[0], src[1]]),
        })
    }

    pub fn write(&self, dst: &mut [u8]) {
        dst[0..2].copy_from_slice(&self.peer_id.to_le_bytes());
    }
}

/// `InMsg` header: server-to-client, source peer id; the message payload
/// follows.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InMsg {
    pub peer_id: PeerId,
}

impl InMsg {
    pub const LEN: usize = 2;

    pub fn parse(src: &[u8]) -> Option<InMsg> {
        if src.len() < Self::LEN {
            return None;
        }
        Some(InMsg {
            peer_id: u16::from_le_bytes([src[0], src[1]]),
        })
    }

    pub fn write(&self, dst: &mut [u8]) {
        dst[0..2].copy_from_slice(&self.peer_id.to_le_bytes());
    }
}
