// In: src/buffer/wire.rs

//! Defines the byte-level framing of a `MessageBuffer`, used whenever a buffer
//! crosses a real transport boundary.
//!
//! Frame layout (little-endian throughout):
//!
//! | field        | size                         |
//! |--------------|------------------------------|
//! | magic `RHSB` | 4                            |
//! | version      | 2 (u16)                      |
//! | lengths      | 5 x 4 (u32, element counts)  |
//! | payloads     | byte, short, int, float, double arrays in that order |

use std::io::{Cursor, Read};

use super::{BufferSizes, MessageBuffer};
use crate::error::RhsegError;
use crate::utils::{bytes_to_typed_vec, checked_u32, typed_slice_to_bytes};

//==================================================================================
// Format Constants
//==================================================================================
/// The magic number identifying a framed message buffer.
pub const BUFFER_MAGIC: &[u8; 4] = b"RHSB";
/// The current version of the buffer frame format.
pub const BUFFER_FORMAT_VERSION: u16 = 1;
/// Size of the fixed frame header: magic(4) + version(2) + 5 lengths(20).
pub const BUFFER_HEADER_SIZE: usize = 26;
/// A reasonable limit to prevent OOM from malformed length fields (256M elements).
const MAX_REASONABLE_ELEMENTS: usize = 256 * 1024 * 1024;

impl BufferSizes {
    /// Payload size in bytes of a buffer with these element counts.
    pub fn payload_bytes(&self) -> usize {
        self.bytes
            + self.shorts * std::mem::size_of::<i16>()
            + self.ints * std::mem::size_of::<u32>()
            + self.floats * std::mem::size_of::<f32>()
            + self.doubles * std::mem::size_of::<f64>()
    }
}

impl MessageBuffer {
    /// Total size of this buffer once framed.
    pub fn encoded_len(&self) -> usize {
        BUFFER_HEADER_SIZE + self.sizes().payload_bytes()
    }

    /// Serializes the buffer into a self-delimiting frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RhsegError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.append_to(&mut out)?;
        Ok(out)
    }

    /// Appends the framed buffer to `out`.
    pub fn append_to(&self, out: &mut Vec<u8>) -> Result<(), RhsegError> {
        let sizes = self.sizes();
        out.extend_from_slice(BUFFER_MAGIC);
        out.extend_from_slice(&BUFFER_FORMAT_VERSION.to_le_bytes());
        for (n, what) in [
            (sizes.bytes, "byte length"),
            (sizes.shorts, "short length"),
            (sizes.ints, "int length"),
            (sizes.floats, "float length"),
            (sizes.doubles, "double length"),
        ] {
            out.extend_from_slice(&checked_u32(n, what)?.to_le_bytes());
        }
        self.append_payload(out);
        Ok(())
    }

    /// Appends the five arrays, little-endian, with no header.
    pub(crate) fn append_payload(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.bytes);
        out.extend_from_slice(&le_bytes(self.shorts.iter().map(|v| v.to_le())));
        out.extend_from_slice(&le_bytes(self.ints.iter().map(|v| v.to_le())));
        out.extend_from_slice(&le_bytes(self.floats.iter().map(|v| v.to_bits().to_le())));
        out.extend_from_slice(&le_bytes(self.doubles.iter().map(|v| v.to_bits().to_le())));
    }

    /// Overwrites the arrays, at their current lengths, from a headerless
    /// little-endian payload of exactly `sizes().payload_bytes()` bytes.
    pub(crate) fn fill_payload(&mut self, payload: &[u8]) -> Result<(), RhsegError> {
        let sizes = self.sizes();
        if payload.len() != sizes.payload_bytes() {
            return Err(RhsegError::FrameFormat(format!(
                "payload of {} bytes given for arrays of {} bytes",
                payload.len(),
                sizes.payload_bytes()
            )));
        }
        let mut at = 0;
        self.bytes.copy_from_slice(take_payload(payload, &mut at, sizes.bytes));

        let short_bytes = take_payload(payload, &mut at, sizes.shorts * 2);
        for (slot, v) in self.shorts.iter_mut().zip(bytes_to_typed_vec::<i16>(short_bytes)?) {
            *slot = i16::from_le(v);
        }
        let int_bytes = take_payload(payload, &mut at, sizes.ints * 4);
        for (slot, v) in self.ints.iter_mut().zip(bytes_to_typed_vec::<u32>(int_bytes)?) {
            *slot = u32::from_le(v);
        }
        let float_bytes = take_payload(payload, &mut at, sizes.floats * 4);
        for (slot, v) in self.floats.iter_mut().zip(bytes_to_typed_vec::<u32>(float_bytes)?) {
            *slot = f32::from_bits(u32::from_le(v));
        }
        let double_bytes = take_payload(payload, &mut at, sizes.doubles * 8);
        for (slot, v) in self.doubles.iter_mut().zip(bytes_to_typed_vec::<u64>(double_bytes)?) {
            *slot = f64::from_bits(u64::from_le(v));
        }
        Ok(())
    }

    /// Deserializes a frame that must span the whole slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RhsegError> {
        let (buffer, consumed) = Self::read_frame(bytes)?;
        if consumed != bytes.len() {
            return Err(RhsegError::FrameFormat(format!(
                "{} trailing byte(s) after message buffer frame",
                bytes.len() - consumed
            )));
        }
        Ok(buffer)
    }

    /// Deserializes one frame from the start of `bytes`, returning the buffer
    /// and the number of bytes consumed.
    pub fn read_frame(bytes: &[u8]) -> Result<(Self, usize), RhsegError> {
        if bytes.len() < BUFFER_HEADER_SIZE {
            return Err(RhsegError::FrameFormat(format!(
                "Buffer frame is too small to be valid. Minimum size: {}, got: {}",
                BUFFER_HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut cursor = Cursor::new(bytes);
        let map_err = |e: std::io::Error| RhsegError::FrameFormat(e.to_string());

        let mut magic_buf = [0u8; 4];
        cursor.read_exact(&mut magic_buf).map_err(map_err)?;
        if magic_buf != *BUFFER_MAGIC {
            return Err(RhsegError::FrameFormat(
                "Invalid message buffer magic number".into(),
            ));
        }

        let mut u16_buf = [0u8; 2];
        cursor.read_exact(&mut u16_buf).map_err(map_err)?;
        let version = u16::from_le_bytes(u16_buf);
        if version != BUFFER_FORMAT_VERSION {
            return Err(RhsegError::FrameFormat(format!(
                "Unsupported buffer frame version: expected {}, got {}",
                BUFFER_FORMAT_VERSION, version
            )));
        }

        let mut lens = [0usize; 5];
        let mut u32_buf = [0u8; 4];
        for len in lens.iter_mut() {
            cursor.read_exact(&mut u32_buf).map_err(map_err)?;
            *len = u32::from_le_bytes(u32_buf) as usize;
            if *len > MAX_REASONABLE_ELEMENTS {
                return Err(RhsegError::FrameFormat(format!(
                    "Declared array length ({}) exceeds maximum allowed ({})",
                    len, MAX_REASONABLE_ELEMENTS
                )));
            }
        }
        let sizes = BufferSizes {
            bytes: lens[0],
            shorts: lens[1],
            ints: lens[2],
            floats: lens[3],
            doubles: lens[4],
        };

        let total = BUFFER_HEADER_SIZE + sizes.payload_bytes();
        if bytes.len() < total {
            return Err(RhsegError::FrameFormat(format!(
                "Declared payload ({} bytes) exceeds remaining frame ({} bytes)",
                total - BUFFER_HEADER_SIZE,
                bytes.len() - BUFFER_HEADER_SIZE
            )));
        }

        let mut buffer = MessageBuffer::with_sizes(sizes);
        buffer.fill_payload(&bytes[BUFFER_HEADER_SIZE..total])?;
        Ok((buffer, total))
    }
}

/// Raw bytes of values already converted to little-endian.
fn le_bytes<T: bytemuck::Pod>(values: impl Iterator<Item = T>) -> Vec<u8> {
    typed_slice_to_bytes(&values.collect::<Vec<T>>())
}

/// Slices the next `n` payload bytes; the caller has already checked the total length.
fn take_payload<'a>(bytes: &'a [u8], at: &mut usize, n: usize) -> &'a [u8] {
    let slice = &bytes[*at..*at + n];
    *at += n;
    slice
}

//==================================================================================
// Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_buffer() -> MessageBuffer {
        let mut buf = MessageBuffer::with_sizes(BufferSizes {
            bytes: 2,
            shorts: 1,
            ints: 3,
            floats: 2,
            doubles: 1,
        });
        let mut w = buf.writer();
        w.put_u8_slice(&[1, 0]).unwrap();
        w.put_i16(12).unwrap();
        w.put_u32_slice(&[7, 8, 9]).unwrap();
        w.put_f32_slice(&[0.25, -4.0]).unwrap();
        w.put_f64(std::f64::consts::PI).unwrap();
        w.finish().unwrap();
        buf
    }

    #[test]
    fn test_frame_roundtrip_is_exact() {
        let original = create_test_buffer();
        let bytes = original.to_bytes().unwrap();
        assert_eq!(bytes.len(), original.encoded_len());
        assert_eq!(bytes.len(), BUFFER_HEADER_SIZE + 2 + 2 + 12 + 8 + 8);
        let restored = MessageBuffer::from_bytes(&bytes).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_payloads_are_little_endian() {
        let bytes = create_test_buffer().to_bytes().unwrap();
        let at = BUFFER_HEADER_SIZE;
        assert_eq!(&bytes[at..at + 2], &[1, 0]);
        assert_eq!(&bytes[at + 2..at + 4], &12i16.to_le_bytes());
        assert_eq!(&bytes[at + 4..at + 8], &[7, 0, 0, 0]);
        assert_eq!(&bytes[at + 16..at + 20], &0.25f32.to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 8..], &std::f64::consts::PI.to_le_bytes());
    }

    #[test]
    fn test_empty_buffer_frames_to_header_only() {
        let bytes = MessageBuffer::empty().to_bytes().unwrap();
        assert_eq!(bytes.len(), BUFFER_HEADER_SIZE);
        assert!(MessageBuffer::from_bytes(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut bytes = create_test_buffer().to_bytes().unwrap();
        bytes[0..4].copy_from_slice(b"BAD!");
        assert!(matches!(
            MessageBuffer::from_bytes(&bytes),
            Err(RhsegError::FrameFormat(_))
        ));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let bytes = create_test_buffer().to_bytes().unwrap();
        let result = MessageBuffer::from_bytes(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(RhsegError::FrameFormat(_))));
    }

    #[test]
    fn test_read_frame_reports_consumed_prefix() {
        let original = create_test_buffer();
        let mut bytes = original.to_bytes().unwrap();
        let frame_len = bytes.len();
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let (restored, consumed) = MessageBuffer::read_frame(&bytes).unwrap();
        assert_eq!(consumed, frame_len);
        assert_eq!(restored, original);
        assert!(MessageBuffer::from_bytes(&bytes).is_err());
    }
}
