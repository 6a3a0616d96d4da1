//! Binary data packets carried over UDP.
//!
//! Layout (all multi-byte fields big-endian):
//!
//! ```text
//! offset  size  field
//! 0       2     magic = 0x4C54 ("LT")
//! 2       1     high nibble = version (0), low nibble = flags
//! 3       1     reserved = 0
//! 4       4     sequence (wraps at 2^32)
//! 8       1     color_format
//! 9       1     encoding
//! 10      2     pixel_count
//! 12..    N     pixel payload
//! ```
//!
//! RAW payloads are `pixel_count * bpp` bytes. RLE payloads are a sequence
//! of `{count: u8 (1..=255), color: bpp bytes}` runs; a decoder truncates
//! at `pixel_count` and zero-fills when the data undershoots, so malformed
//! input yields a valid (partially black) buffer rather than an error.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::types::{ColorFormat, Encoding};
use crate::PACKET_MAGIC;

/// Packet header size in bytes (magic through sequence).
pub const HEADER_SIZE: usize = 8;

/// Frame header size in bytes (color_format through pixel_count).
pub const FRAME_HEADER_SIZE: usize = 4;

/// A decoded (or to-be-encoded) data packet.
///
/// `pixels` is a flat buffer of `pixel_count * bytes_per_pixel` bytes,
/// pixel-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPacket {
    pub sequence: u32,
    pub color_format: ColorFormat,
    pub encoding: Encoding,
    pub flags: u8,
    pub pixels: Vec<u8>,
}

impl DataPacket {
    pub fn new(
        sequence: u32,
        color_format: ColorFormat,
        encoding: Encoding,
        pixels: Vec<u8>,
    ) -> Self {
        Self {
            sequence,
            color_format,
            encoding,
            flags: 0,
            pixels,
        }
    }

    /// Number of whole pixels in the payload.
    pub fn pixel_count(&self) -> usize {
        self.pixels.len() / self.color_format.bytes_per_pixel()
    }

    /// Serialize the packet, applying the configured payload encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let bpp = self.color_format.bytes_per_pixel();
        let pixel_count = self.pixel_count();
        if pixel_count > u16::MAX as usize {
            return Err(ProtocolError::invalid_format(format!(
                "pixel count {pixel_count} exceeds u16 range"
            )));
        }

        let payload = match self.encoding {
            Encoding::Raw => self.pixels[..pixel_count * bpp].to_vec(),
            Encoding::Rle => encode_rle(&self.pixels[..pixel_count * bpp], bpp),
            Encoding::Delta => {
                return Err(ProtocolError::invalid_format(
                    "delta encoding is reserved and cannot be produced",
                ));
            }
        };

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + FRAME_HEADER_SIZE + payload.len());
        buf.put_u16(PACKET_MAGIC);
        buf.put_u8(self.flags & 0x0F); // version 0 in the high nibble
        buf.put_u8(0); // reserved
        buf.put_u32(self.sequence);
        buf.put_u8(self.color_format.as_wire());
        buf.put_u8(self.encoding.as_wire());
        buf.put_u16(pixel_count as u16);
        buf.put_slice(&payload);
        Ok(buf.to_vec())
    }

    /// Parse a packet from a received datagram.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_SIZE + FRAME_HEADER_SIZE {
            return Err(ProtocolError::invalid_format(format!(
                "packet too small: {} bytes",
                data.len()
            )));
        }

        let mut buf = data;
        let magic = buf.get_u16();
        if magic != PACKET_MAGIC {
            return Err(ProtocolError::invalid_format(format!(
                "invalid magic: 0x{magic:04X}"
            )));
        }
        let ver_flags = buf.get_u8();
        let flags = ver_flags & 0x0F;
        let _reserved = buf.get_u8();
        let sequence = buf.get_u32();

        let color_wire = buf.get_u8();
        let color_format = ColorFormat::from_wire(color_wire).ok_or_else(|| {
            ProtocolError::invalid_format(format!("unknown color format: 0x{color_wire:02X}"))
        })?;
        let encoding_wire = buf.get_u8();
        let encoding = Encoding::from_wire(encoding_wire).ok_or_else(|| {
            ProtocolError::invalid_format(format!("unknown encoding: 0x{encoding_wire:02X}"))
        })?;
        let pixel_count = buf.get_u16() as usize;

        let bpp = color_format.bytes_per_pixel();
        let pixels = match encoding {
            Encoding::Raw => {
                let expected = pixel_count * bpp;
                if buf.remaining() < expected {
                    return Err(ProtocolError::invalid_format(format!(
                        "insufficient raw data: expected {expected}, got {}",
                        buf.remaining()
                    )));
                }
                buf[..expected].to_vec()
            }
            Encoding::Rle => decode_rle(buf, bpp, pixel_count),
            Encoding::Delta => {
                return Err(ProtocolError::invalid_format(
                    "delta encoding is not supported",
                ));
            }
        };

        Ok(Self {
            sequence,
            color_format,
            encoding,
            flags,
            pixels,
        })
    }
}

/// Run-length encode a pixel buffer. Runs are capped at 255 pixels.
fn encode_rle(pixels: &[u8], bpp: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunks = pixels.chunks_exact(bpp).peekable();
    while let Some(color) = chunks.next() {
        let mut count: u8 = 1;
        while count < u8::MAX {
            match chunks.peek() {
                Some(next) if *next == color => {
                    chunks.next();
                    count += 1;
                }
                _ => break,
            }
        }
        out.push(count);
        out.extend_from_slice(color);
    }
    out
}

/// Decode RLE data into exactly `pixel_count * bpp` bytes.
///
/// Excess runs are truncated at `pixel_count`; short input leaves the
/// remainder zero-filled.
fn decode_rle(data: &[u8], bpp: usize, pixel_count: usize) -> Vec<u8> {
    let mut out = vec![0u8; pixel_count * bpp];
    let mut pos = 0;
    let mut pixel_idx = 0;

    while pos < data.len() && pixel_idx < pixel_count {
        let count = data[pos] as usize;
        pos += 1;
        if pos + bpp > data.len() {
            break;
        }
        let color = &data[pos..pos + bpp];
        pos += bpp;

        let end = (pixel_idx + count).min(pixel_count);
        for i in pixel_idx..end {
            out[i * bpp..(i + 1) * bpp].copy_from_slice(color);
        }
        pixel_idx = end;
    }

    out
}
