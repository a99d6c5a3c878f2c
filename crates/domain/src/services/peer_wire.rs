//! Peer-to-peer wire protocol.
//!
//! A connection opens with a fixed 68 byte handshake in each direction:
//!
//! ```text
//! <pstrlen=19><pstr="BitTorrent protocol"><reserved: 8><info_hash: 20><peer_id: 20>
//! ```
//!
//! Everything after it is framed as `<len: u32 BE><id: u8><payload>`, where
//! `len` counts the id byte and the payload.
use crate::entities::{InfoHash, WirePeerId, INFO_HASH_LEN, MAX_PIECE_LENGTH};
use crate::errors::DomainError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + INFO_HASH_LEN + INFO_HASH_LEN;

/// Frames larger than this are rejected before being buffered. Fits the
/// largest allowed piece plus its id and index.
pub const DEFAULT_MAX_FRAME: usize = MAX_PIECE_LENGTH as usize + 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: InfoHash,
    pub peer_id: WirePeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: WirePeerId) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[28..48].copy_from_slice(self.info_hash.as_bytes());
        buf[48..68].copy_from_slice(&self.peer_id.0);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DomainError> {
        if buf.len() != HANDSHAKE_LEN {
            return Err(DomainError::ProtocolError(format!(
                "handshake must be {} bytes, got {}",
                HANDSHAKE_LEN,
                buf.len()
            )));
        }
        if buf[0] as usize != PROTOCOL.len() || &buf[1..20] != PROTOCOL {
            return Err(DomainError::ProtocolError("unknown protocol in handshake".to_string()));
        }

        let info_hash = InfoHash::from_bytes(&buf[28..48])?;
        let mut peer_id = [0u8; INFO_HASH_LEN];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self {
            info_hash,
            peer_id: WirePeerId(peer_id),
        })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut W) -> Result<(), DomainError> {
        stream.write_all(&self.encode()).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads exactly one handshake, so no post-handshake bytes are consumed.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut R,
        limit: Duration,
    ) -> Result<Self, DomainError> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        tokio::time::timeout(limit, stream.read_exact(&mut buf))
            .await
            .map_err(|_| DomainError::Timeout("waiting for handshake".to_string()))??;
        Self::decode(&buf)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    Bitfield = 5,
    Request = 6,
    Piece = 7,
}

impl TryFrom<u8> for MessageId {
    type Error = DomainError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            other => Err(DomainError::ProtocolError(format!("unknown message id {}", other))),
        }
    }
}

/// Messages exchanged after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `<len=1+X><id=5><bitfield>`
    Bitfield(Bytes),
    /// `<len=25><id=6><info_hash><index>`
    Request { info_hash: InfoHash, index: u32 },
    /// `<len=5+X><id=7><index><data>`
    Piece { index: u32, data: Bytes },
}

#[derive(Debug, Clone)]
pub struct PeerCodec {
    max_frame: usize,
}

impl Default for PeerCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl PeerCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Encoder<Message> for PeerCodec {
    type Error = DomainError;

    fn encode(&mut self, item: Message, buf: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Bitfield(bits) => {
                buf.reserve(5 + bits.len());
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put(bits);
            }
            Message::Request { info_hash, index } => {
                buf.reserve(4 + 1 + INFO_HASH_LEN + 4);
                buf.put_u32((1 + INFO_HASH_LEN + 4) as u32);
                buf.put_u8(MessageId::Request as u8);
                buf.put_slice(info_hash.as_bytes());
                buf.put_u32(index);
            }
            Message::Piece { index, data } => {
                if 5 + data.len() > self.max_frame {
                    return Err(DomainError::ProtocolError(format!(
                        "piece {} of {} bytes exceeds frame limit",
                        index,
                        data.len()
                    )));
                }
                buf.reserve(9 + data.len());
                buf.put_u32(5 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(index);
                buf.put(data);
            }
        }
        Ok(())
    }
}

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = DomainError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < 4 {
            return Ok(None);
        }

        // peek the length without consuming it
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len == 0 {
            return Err(DomainError::ProtocolError("empty frame".to_string()));
        }
        if len > self.max_frame {
            return Err(DomainError::ProtocolError(format!(
                "frame of {} bytes exceeds limit of {}",
                len, self.max_frame
            )));
        }
        if buf.len() < 4 + len {
            buf.reserve(4 + len - buf.len());
            return Ok(None);
        }

        buf.advance(4);
        let mut frame = buf.split_to(len);
        let id = MessageId::try_from(frame.get_u8())?;

        let message = match id {
            MessageId::Bitfield => Message::Bitfield(frame.freeze()),
            MessageId::Request => {
                if frame.len() != INFO_HASH_LEN + 4 {
                    return Err(DomainError::ProtocolError(format!(
                        "request payload must be {} bytes, got {}",
                        INFO_HASH_LEN + 4,
                        frame.len()
                    )));
                }
                let info_hash = InfoHash::from_bytes(&frame[..INFO_HASH_LEN])?;
                frame.advance(INFO_HASH_LEN);
                Message::Request {
                    info_hash,
                    index: frame.get_u32(),
                }
            }
            MessageId::Piece => {
                if frame.len() < 4 {
                    return Err(DomainError::ProtocolError("piece frame without index".to_string()));
                }
                let index = frame.get_u32();
                Message::Piece {
                    index,
                    data: frame.freeze(),
                }
            }
        };

        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_hash() -> InfoHash {
        InfoHash([7u8; 20])
    }

    #[test]
    fn handshake_layout_is_fixed() {
        let handshake = Handshake::new(info_hash(), WirePeerId([9u8; 20]));
        let bytes = handshake.encode();

        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[7u8; 20]);
        assert_eq!(Handshake::decode(&bytes).unwrap(), handshake);
    }

    #[test]
    fn handshake_with_foreign_protocol_is_rejected() {
        let mut bytes = Handshake::new(info_hash(), WirePeerId([1u8; 20])).encode();
        bytes[1] = b'X';

        assert!(matches!(Handshake::decode(&bytes), Err(DomainError::ProtocolError(_))));
    }

    #[test]
    fn request_frame_carries_identity_and_index() {
        let mut codec = PeerCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Message::Request { info_hash: info_hash(), index: 3 }, &mut buf)
            .unwrap();

        assert_eq!(&buf[..5], &[0, 0, 0, 25, 6]);
        assert_eq!(&buf[25..29], &[0, 0, 0, 3]);
    }

    #[test]
    fn decoder_waits_for_a_whole_frame() {
        let mut codec = PeerCodec::default();
        let mut encoded = BytesMut::new();
        codec
            .encode(
                Message::Piece { index: 1, data: Bytes::from_static(b"hello") },
                &mut encoded,
            )
            .unwrap();

        let mut partial = BytesMut::from(&encoded[..7]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);

        partial.extend_from_slice(&encoded[7..]);
        assert_eq!(
            codec.decode(&mut partial).unwrap(),
            Some(Message::Piece { index: 1, data: Bytes::from_static(b"hello") })
        );
        assert!(partial.is_empty());
    }

    #[test]
    fn oversized_and_unknown_frames_are_protocol_errors() {
        let mut codec = PeerCodec::new(8);
        let mut oversized = BytesMut::from(&[0u8, 0, 0, 9, 7][..]);
        assert!(matches!(codec.decode(&mut oversized), Err(DomainError::ProtocolError(_))));

        let mut unknown = BytesMut::from(&[0u8, 0, 0, 1, 42][..]);
        assert!(matches!(codec.decode(&mut unknown), Err(DomainError::ProtocolError(_))));
    }

    #[test]
    fn the_default_codec_carries_a_piece_of_the_largest_allowed_length() {
        let mut codec = PeerCodec::default();
        let data = Bytes::from(vec![1u8; MAX_PIECE_LENGTH as usize]);
        let mut buf = BytesMut::new();

        codec.encode(Message::Piece { index: 3, data: data.clone() }, &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Piece { index: 3, data }));

        let oversized = Bytes::from(vec![1u8; MAX_PIECE_LENGTH as usize + 1]);
        let result = codec.encode(Message::Piece { index: 4, data: oversized }, &mut BytesMut::new());
        assert!(matches!(result, Err(DomainError::ProtocolError(_))));
    }
}
