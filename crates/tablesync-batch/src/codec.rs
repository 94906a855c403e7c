//! Wire encoding for delivered batches
//!
//! A packet is serialized to JSON, compressed (LZ4 for small payloads, Zstd
//! otherwise) and framed as `[algorithm u8][length u32 BE][payload]`.

use crate::BatchError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{Read, Write};
use tablesync_state::BatchPacket;

const HEADER_LEN: usize = 5;

/// Payloads below this size use LZ4
pub const LZ4_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CompressionAlgorithm {
    #[cfg_attr(feature = "clap", value(name = "zstd"))]
    Zstd,
    #[cfg_attr(feature = "clap", value(name = "lz4"))]
    Lz4,
}

impl CompressionAlgorithm {
    fn tag(self) -> u8 {
        match self {
            CompressionAlgorithm::Zstd => 1,
            CompressionAlgorithm::Lz4 => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, BatchError> {
        match tag {
            1 => Ok(CompressionAlgorithm::Zstd),
            2 => Ok(CompressionAlgorithm::Lz4),
            other => Err(BatchError::Codec(format!("Unknown compression tag {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    algorithm: CompressionAlgorithm,
    level: i32,
}

impl Compressor {
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self {
            algorithm,
            level: match algorithm {
                CompressionAlgorithm::Zstd => 3,
                CompressionAlgorithm::Lz4 => 0,
            },
        }
    }

    /// Zstd level; ignored by LZ4
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, BatchError> {
        match self.algorithm {
            CompressionAlgorithm::Zstd => {
                let mut encoder = zstd::Encoder::new(Vec::new(), self.level)
                    .map_err(|e| BatchError::Codec(format!("zstd encoder: {e}")))?;
                encoder
                    .write_all(data)
                    .map_err(|e| BatchError::Codec(format!("zstd write: {e}")))?;
                encoder
                    .finish()
                    .map_err(|e| BatchError::Codec(format!("zstd finish: {e}")))
            }
            CompressionAlgorithm::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, BatchError> {
        match self.algorithm {
            CompressionAlgorithm::Zstd => {
                let mut decoder = zstd::Decoder::new(data)
                    .map_err(|e| BatchError::Codec(format!("zstd decoder: {e}")))?;
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| BatchError::Codec(format!("zstd read: {e}")))?;
                Ok(out)
            }
            CompressionAlgorithm::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| BatchError::Codec(format!("lz4: {e}"))),
        }
    }
}

/// Size-adaptive framing codec for `BatchPacket`
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    zstd: Compressor,
    lz4: Compressor,
    threshold: usize,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec {
    pub fn new() -> Self {
        Self {
            zstd: Compressor::new(CompressionAlgorithm::Zstd),
            lz4: Compressor::new(CompressionAlgorithm::Lz4),
            threshold: LZ4_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Algorithm chosen for a serialized payload of `len` bytes
    pub fn algorithm_for(&self, len: usize) -> CompressionAlgorithm {
        if len < self.threshold {
            CompressionAlgorithm::Lz4
        } else {
            CompressionAlgorithm::Zstd
        }
    }

    pub fn encode(&self, packet: &BatchPacket) -> Result<Bytes, BatchError> {
        let json = serde_json::to_vec(packet)?;
        let compressor = match self.algorithm_for(json.len()) {
            CompressionAlgorithm::Lz4 => &self.lz4,
            CompressionAlgorithm::Zstd => &self.zstd,
        };
        let payload = compressor.compress(&json)?;

        let length = u32::try_from(payload.len())
            .map_err(|_| BatchError::Codec("Frame too large".to_string()))?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u8(compressor.algorithm().tag());
        buf.put_u32(length);
        buf.extend_from_slice(&payload);
        Ok(buf.freeze())
    }

    /// Algorithm recorded in a frame header
    pub fn frame_algorithm(frame: &[u8]) -> Result<CompressionAlgorithm, BatchError> {
        match frame.first() {
            Some(tag) => CompressionAlgorithm::from_tag(*tag),
            None => Err(BatchError::Codec("Empty frame".to_string())),
        }
    }

    pub fn decode(&self, frame: &[u8]) -> Result<BatchPacket, BatchError> {
        if frame.len() < HEADER_LEN {
            return Err(BatchError::Codec("Truncated frame header".to_string()));
        }

        let mut header = &frame[..HEADER_LEN];
        let algorithm = CompressionAlgorithm::from_tag(header.get_u8())?;
        let length = header.get_u32() as usize;

        let payload = &frame[HEADER_LEN..];
        if payload.len() != length {
            return Err(BatchError::Codec(format!(
                "Frame length mismatch: header says {length}, got {}",
                payload.len()
            )));
        }

        let json = match algorithm {
            CompressionAlgorithm::Lz4 => self.lz4.decompress(payload)?,
            CompressionAlgorithm::Zstd => self.zstd.decompress(payload)?,
        };
        Ok(serde_json::from_slice(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablesync_state::{Event, EventPayload, Priority, Vec2};

    fn packet(events: usize) -> BatchPacket {
        let events = (0..events)
            .map(|n| {
                Event::new(
                    EventPayload::TokenMoved {
                        token_id: format!("token-{n}"),
                        position: Vec2::new(n as f64, 2.0),
                        velocity: None,
                    },
                    Priority::Normal,
                    n as u64,
                )
                .into()
            })
            .collect();
        BatchPacket::new("room", 42, events)
    }

    #[test]
    fn test_small_packets_use_lz4() {
        let codec = WireCodec::new();
        let original = packet(1);
        let frame = codec.encode(&original).unwrap();
        assert_eq!(
            WireCodec::frame_algorithm(&frame).unwrap(),
            CompressionAlgorithm::Lz4
        );
        assert_eq!(codec.decode(&frame).unwrap(), original);
    }

    #[test]
    fn test_large_packets_use_zstd() {
        let codec = WireCodec::new();
        let original = packet(40);
        let frame = codec.encode(&original).unwrap();
        assert_eq!(frame[0], CompressionAlgorithm::Zstd.tag());
        assert_eq!(codec.decode(&frame).unwrap(), original);
    }

    #[test]
    fn test_rejects_corrupt_frames() {
        let codec = WireCodec::new();
        assert!(matches!(codec.decode(&[2, 0]), Err(BatchError::Codec(_))));

        let mut frame = codec.encode(&packet(2)).unwrap().to_vec();
        frame[0] = 9;
        assert!(matches!(codec.decode(&frame), Err(BatchError::Codec(_))));

        let mut frame = codec.encode(&packet(2)).unwrap().to_vec();
        frame.pop();
        assert!(matches!(codec.decode(&frame), Err(BatchError::Codec(_))));
    }
}
