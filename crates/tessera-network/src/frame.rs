//! Tokio codec for the Tessera wire frame.
//!
//! Frame layout:
//! `magic(4) || command(12, NUL-padded ASCII) || payload_len(4, LE) ||
//! checksum(4, first four bytes of DSHA256(payload)) || payload`.
//!
//! Decoding runs a two-state machine (header, then body) so partial reads
//! never re-parse the header.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use tessera_core::constants::MAX_MESSAGE_SIZE;
use tessera_core::error::NetworkError;
use tessera_core::hashes::checksum4;

use crate::message::Message;

/// Length of the fixed frame header.
pub const HEADER_LEN: usize = 24;

/// Length of the command field.
pub const COMMAND_LEN: usize = 12;

enum DecodeState {
    Head,
    Body { command: String, body_len: usize, checksum: [u8; 4] },
}

/// Frames [`Message`]s over a byte stream.
pub struct FrameCodec {
    magic: [u8; 4],
    state: DecodeState,
}

impl FrameCodec {
    pub fn new(magic: [u8; 4]) -> Self {
        Self { magic, state: DecodeState::Head }
    }
}

fn pad_command(command: &str) -> [u8; COMMAND_LEN] {
    let mut field = [0u8; COMMAND_LEN];
    field[..command.len()].copy_from_slice(command.as_bytes());
    field
}

fn parse_command(field: &[u8]) -> Result<String, NetworkError> {
    // ASCII up to the first NUL; no NUL may be followed by more ASCII.
    let end = field.iter().position(|&b| b == 0).unwrap_or(COMMAND_LEN);
    if field[end..].iter().any(|&b| b != 0) {
        return Err(NetworkError::UnknownCommand("embedded NUL".into()));
    }
    let bytes = &field[..end];
    if !bytes.is_ascii() || bytes.is_empty() {
        return Err(NetworkError::UnknownCommand(format!("{bytes:02x?}")));
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

impl Encoder<Message> for FrameCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.encode_payload();
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(NetworkError::MessageTooLarge { size: payload.len() });
        }

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_slice(&self.magic);
        dst.put_slice(&pad_command(item.command()));
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&checksum4(&payload));
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Self::Error> {
        loop {
            match &self.state {
                DecodeState::Head => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }

                    if src[..4] != self.magic {
                        return Err(NetworkError::InvalidMagic);
                    }
                    let command = parse_command(&src[4..4 + COMMAND_LEN])?;
                    let body_len = u32::from_le_bytes(src[16..20].try_into().unwrap()) as usize;
                    if body_len > MAX_MESSAGE_SIZE {
                        return Err(NetworkError::MessageTooLarge { size: body_len });
                    }
                    let checksum: [u8; 4] = src[20..24].try_into().unwrap();

                    src.advance(HEADER_LEN);
                    src.reserve(body_len);
                    self.state = DecodeState::Body { command, body_len, checksum };
                }
                DecodeState::Body { command, body_len, checksum } => {
                    if src.len() < *body_len {
                        return Ok(None);
                    }

                    let payload = src.split_to(*body_len);
                    if checksum4(&payload) != *checksum {
                        self.state = DecodeState::Head;
                        return Err(NetworkError::ChecksumMismatch);
                    }

                    let message = Message::decode_payload(command, &payload)?;
                    self.state = DecodeState::Head;
                    return Ok(Some(message));
                }
            }
        }
    }
}
