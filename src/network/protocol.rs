// Protocol - Peer wire frames exchanged between the harness and a node
// Principle: Every frame is length-prefixed and size-checked before decoding

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Wire protocol version announced in `Hello`
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum allowed frame body, checked before allocating the read buffer
pub const MAX_FRAME_SIZE: usize = 2 * 1024 * 1024; // 2 MB

/// Error type for protocol operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(e.to_string())
        }
    }
}

/// What a peer is willing to do on this connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// Accepts and relays transactions
    TxRelay,
    /// Serves blocks
    BlockSync,
}

/// Identity and capability frame, sent first by both sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol_version: u32,
    /// Chain identifier; peers on different chains are refused
    pub chain: String,
    pub node_id: String,
    pub capabilities: Vec<Capability>,
    pub best_height: u64,
}

impl Hello {
    /// Hello announced by the harness
    pub fn harness(chain: &str) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            chain: chain.to_string(),
            node_id: format!("kratos-testnet-{}", std::process::id()),
            capabilities: vec![Capability::TxRelay],
            best_height: 0,
        }
    }

    /// Check the remote hello is compatible with ours
    pub fn check_compatible(&self, remote: &Hello) -> Result<(), ProtocolError> {
        if remote.protocol_version != self.protocol_version {
            return Err(ProtocolError::Handshake(format!(
                "protocol version mismatch: local {}, remote {}",
                self.protocol_version, remote.protocol_version
            )));
        }
        if remote.chain != self.chain {
            return Err(ProtocolError::Handshake(format!(
                "chain mismatch: local {}, remote {}",
                self.chain, remote.chain
            )));
        }
        Ok(())
    }
}

/// Encoded transaction as relayed over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Normalized `0x` hash
    pub hash: String,
    pub data: Vec<u8>,
}

/// Frames on a peer session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerFrame {
    Hello(Hello),
    /// Transactions to add to the mempool
    Transactions(Vec<RawTransaction>),
    Ping(u64),
    Pong(u64),
    /// Peer is closing, with a reason
    Disconnect(String),
}

impl PeerFrame {
    /// Encode the frame body
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::SerializationFailed(e.to_string()))
    }

    /// Decode a frame body, rejecting oversized input before deserializing
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        bincode::deserialize(bytes).map_err(|e| ProtocolError::DeserializationFailed(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PeerFrame::Hello(_) => "hello",
            PeerFrame::Transactions(_) => "transactions",
            PeerFrame::Ping(_) => "ping",
            PeerFrame::Pong(_) => "pong",
            PeerFrame::Disconnect(_) => "disconnect",
        }
    }
}

/// Write one frame: 4-byte big-endian length, then the body
pub async fn write_frame<W>(io: &mut W, frame: &PeerFrame) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let body = frame.encode()?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    io.write_all(&(body.len() as u32).to_be_bytes()).await?;
    io.write_all(&body).await?;
    io.flush().await?;
    Ok(())
}

/// Read one frame
pub async fn read_frame<R>(io: &mut R) -> Result<PeerFrame, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    // Read length prefix (4 bytes)
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    // Validate size
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    // Read body
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;

    PeerFrame::decode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(chain: &str, version: u32) -> Hello {
        Hello {
            protocol_version: version,
            chain: chain.to_string(),
            node_id: "node-a".to_string(),
            capabilities: vec![Capability::TxRelay, Capability::BlockSync],
            best_height: 12,
        }
    }

    #[tokio::test]
    async fn test_frames_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let frames = vec![
            PeerFrame::Hello(hello("kratos", PROTOCOL_VERSION)),
            PeerFrame::Transactions(vec![RawTransaction {
                hash: "0xabc".to_string(),
                data: vec![1, 2, 3],
            }]),
            PeerFrame::Ping(7),
        ];
        for frame in &frames {
            write_frame(&mut client, frame).await.unwrap();
        }

        for expected in &frames {
            assert_eq!(&read_frame(&mut server).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes())
            .await
            .unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            PeerFrame::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(ProtocolError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn test_hello_compatibility() {
        let local = hello("kratos", PROTOCOL_VERSION);
        assert!(local.check_compatible(&hello("kratos", PROTOCOL_VERSION)).is_ok());
        assert!(local.check_compatible(&hello("other", PROTOCOL_VERSION)).is_err());
        assert!(local.check_compatible(&hello("kratos", 99)).is_err());
    }
}
