// MIT License - Copyright (c) 2026 Peter Wright
// Frame codec: XOR cipher, CRC-32, fixed 188-byte layout

use tracing::debug;

use crate::constants::{FRAME_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::{AirtubError, Result};

/// The result of decoding a frame received from the group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Protocol message kind (byte 0).
    pub msg_type: u8,
    /// Plaintext length declared in byte 1.
    pub data_len: usize,
    /// Decrypted payload. Empty unless `crc_valid`.
    pub payload: Vec<u8>,
    /// Whether the stored CRC matched the cipher-text.
    pub crc_valid: bool,
}

impl DecodedFrame {
    /// The payload as text. Non-UTF-8 bytes are replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Airtub frame codec.
///
/// The payload is XORed with the shared secret, cycled over the payload
/// length. The same operation encrypts and decrypts. A CRC-32 over the
/// cipher-text is stored little-endian at offset 4.
#[derive(Clone)]
pub struct AirtubCrypt {
    secret: Vec<u8>,
}

impl std::fmt::Debug for AirtubCrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirtubCrypt")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl AirtubCrypt {
    /// Create a codec for the given shared secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Repeating-key XOR. An empty key leaves the data unchanged.
    pub fn xor_crypt(data: &[u8], key: &[u8]) -> Vec<u8> {
        if key.is_empty() {
            return data.to_vec();
        }
        data.iter()
            .zip(key.iter().cycle())
            .map(|(&b, &k)| b ^ k)
            .collect()
    }

    /// CRC-32 (IEEE) as used by the frame header.
    pub fn checksum(data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Encode a plaintext payload into a full wire frame.
    pub fn encode_frame(&self, msg_type: u8, plaintext: &[u8]) -> Result<Vec<u8>> {
        let data_len = plaintext.len();
        if data_len > MAX_PAYLOAD_SIZE {
            return Err(AirtubError::PayloadTooLarge {
                len: data_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let cipher = Self::xor_crypt(plaintext, &self.secret);
        let crc = Self::checksum(&cipher);

        let mut frame = Vec::with_capacity(FRAME_SIZE);
        frame.push(msg_type);
        frame.push(data_len as u8);
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&cipher);
        frame.resize(FRAME_SIZE, 0);

        Ok(frame)
    }

    /// Decode a raw datagram.
    ///
    /// Empty input yields an all-zero result. Anything shorter than the
    /// header, or whose `data_len` runs past the buffer, is reported with
    /// `crc_valid = false` and no payload.
    pub fn decode_frame(&self, data: &[u8]) -> DecodedFrame {
        if data.is_empty() {
            return DecodedFrame::default();
        }
        if data.len() < HEADER_SIZE {
            debug!("Frame too short ({} bytes)", data.len());
            return DecodedFrame {
                msg_type: data[0],
                data_len: data.get(1).copied().unwrap_or(0) as usize,
                ..Default::default()
            };
        }

        let msg_type = data[0];
        let data_len = data[1] as usize;
        let mut decoded = DecodedFrame {
            msg_type,
            data_len,
            ..Default::default()
        };

        let end = HEADER_SIZE + data_len;
        if data_len > MAX_PAYLOAD_SIZE || end > data.len() {
            debug!(
                "Frame data_len {} exceeds buffer of {} bytes",
                data_len,
                data.len()
            );
            return decoded;
        }

        let stored = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let cipher = &data[HEADER_SIZE..end];
        let computed = Self::checksum(cipher);
        if stored != computed {
            debug!("CRC Not Ok (expected {:08x}, got {:08x})", computed, stored);
            return decoded;
        }

        decoded.crc_valid = true;
        decoded.payload = Self::xor_crypt(cipher, &self.secret);
        decoded
    }
}
