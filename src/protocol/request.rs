// In: src/protocol/request.rs

//! Request kinds and the envelope that carries one message between tasks.
//!
//! Envelope frame layout (little-endian):
//!
//! | field        | size |
//! |--------------|------|
//! | magic `RHSE` | 4    |
//! | version      | 2    |
//! | kind         | 2    |
//! | from, to     | 4, 4 |
//! | level        | 2    |
//! | section      | 4    |
//! | value        | 4    |
//! | fingerprint  | 4    |
//! | payload      | one `MessageBuffer` frame |

use std::fmt;

use crate::buffer::MessageBuffer;
use crate::error::RhsegError;
use crate::records::layout::RecordLayout;

pub const ENVELOPE_MAGIC: &[u8; 4] = b"RHSE";
pub const ENVELOPE_FORMAT_VERSION: u16 = 1;
/// magic(4) + version(2) + kind(2) + from(4) + to(4) + level(2) + section(4)
/// + value(4) + fingerprint(4).
pub const ENVELOPE_HEADER_SIZE: usize = 30;

/// The reserved request ids of the recursion protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Zero-payload shutdown, relayed down the tree.
    Terminate,
    /// Child to parent: regions and unresolved border pixels.
    RecurData,
    /// Parent to child: label offsets, global counts and merge threshold.
    RecurResponse,
    /// Parent to server: final label maps for the server's labels.
    UpdateLabels,
    /// Parent to server: gather pixel records of the subtree.
    CollectPixels,
    /// Acknowledges `UpdateLabels`.
    Ack,
    /// Parent to server: gather final label rasters of the subtree.
    CollectLabels,
    /// Answers either gather.
    CollectReply,
}

impl RequestKind {
    pub fn id(self) -> u16 {
        match self {
            RequestKind::Terminate => 0,
            RequestKind::RecurData => 1,
            RequestKind::RecurResponse => 2,
            RequestKind::UpdateLabels => 3,
            RequestKind::CollectPixels => 4,
            RequestKind::Ack => 5,
            RequestKind::CollectLabels => 6,
            RequestKind::CollectReply => 7,
        }
    }

    /// The reply a request of this kind expects, if any.
    pub fn expected_reply(self) -> Option<RequestKind> {
        match self {
            RequestKind::RecurData => Some(RequestKind::RecurResponse),
            RequestKind::UpdateLabels => Some(RequestKind::Ack),
            RequestKind::CollectPixels | RequestKind::CollectLabels => {
                Some(RequestKind::CollectReply)
            }
            RequestKind::Terminate
            | RequestKind::RecurResponse
            | RequestKind::Ack
            | RequestKind::CollectReply => None,
        }
    }
}

impl TryFrom<u16> for RequestKind {
    type Error = RhsegError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(RequestKind::Terminate),
            1 => Ok(RequestKind::RecurData),
            2 => Ok(RequestKind::RecurResponse),
            3 => Ok(RequestKind::UpdateLabels),
            4 => Ok(RequestKind::CollectPixels),
            5 => Ok(RequestKind::Ack),
            6 => Ok(RequestKind::CollectLabels),
            7 => Ok(RequestKind::CollectReply),
            other => Err(RhsegError::FrameFormat(format!("unknown request id {}", other))),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.id())
    }
}

/// One message: a routing header and a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: RequestKind,
    pub from: u32,
    pub to: u32,
    /// Recursion level the exchange belongs to.
    pub level: u16,
    /// Section of the sending task.
    pub section: u32,
    /// A request-specific scalar.
    pub value: u32,
    /// `RecordLayout::fingerprint` of the sender.
    pub fingerprint: u32,
    pub payload: MessageBuffer,
}

impl Envelope {
    /// A zero-payload envelope stamped with `layout`.
    pub fn new(kind: RequestKind, from: u32, to: u32, level: u16, layout: &RecordLayout) -> Self {
        Self {
            kind,
            from,
            to,
            level,
            section: from,
            value: 0,
            fingerprint: layout.fingerprint(),
            payload: MessageBuffer::empty(),
        }
    }

    pub fn with_payload(mut self, payload: MessageBuffer) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_value(mut self, value: u32) -> Self {
        self.value = value;
        self
    }

    pub fn with_section(mut self, section: u32) -> Self {
        self.section = section;
        self
    }

    /// Refuses an envelope packed under a different record layout.
    pub fn check_layout(&self, layout: &RecordLayout) -> Result<(), RhsegError> {
        let expected = layout.fingerprint();
        if self.fingerprint != expected {
            return Err(RhsegError::LayoutMismatch {
                sent: self.fingerprint,
                expected,
            });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RhsegError> {
        let mut out = Vec::with_capacity(ENVELOPE_HEADER_SIZE + self.payload.encoded_len());
        out.extend_from_slice(ENVELOPE_MAGIC);
        out.extend_from_slice(&ENVELOPE_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.kind.id().to_le_bytes());
        out.extend_from_slice(&self.from.to_le_bytes());
        out.extend_from_slice(&self.to.to_le_bytes());
        out.extend_from_slice(&self.level.to_le_bytes());
        out.extend_from_slice(&self.section.to_le_bytes());
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&self.fingerprint.to_le_bytes());
        self.payload.append_to(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RhsegError> {
        if bytes.len() < ENVELOPE_HEADER_SIZE {
            return Err(RhsegError::FrameFormat(format!(
                "Envelope is too small to be valid. Minimum size: {}, got: {}",
                ENVELOPE_HEADER_SIZE,
                bytes.len()
            )));
        }
        if &bytes[0..4] != ENVELOPE_MAGIC {
            return Err(RhsegError::FrameFormat("Invalid envelope magic number".into()));
        }
        let mut header = HeaderCursor { bytes, at: 4 };
        let version = header.u16();
        if version != ENVELOPE_FORMAT_VERSION {
            return Err(RhsegError::FrameFormat(format!(
                "Unsupported envelope version: expected {}, got {}",
                ENVELOPE_FORMAT_VERSION, version
            )));
        }
        let kind = RequestKind::try_from(header.u16())?;
        let from = header.u32();
        let to = header.u32();
        let level = header.u16();
        let section = header.u32();
        let value = header.u32();
        let fingerprint = header.u32();
        let payload = MessageBuffer::from_bytes(&bytes[ENVELOPE_HEADER_SIZE..])?;
        Ok(Envelope {
            kind,
            from,
            to,
            level,
            section,
            value,
            fingerprint,
            payload,
        })
    }
}

/// Reads fixed-width header fields; the caller has checked the header length.
struct HeaderCursor<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl HeaderCursor<'_> {
    fn u16(&mut self) -> u16 {
        let value = u16::from_le_bytes([self.bytes[self.at], self.bytes[self.at + 1]]);
        self.at += 2;
        value
    }

    fn u32(&mut self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[self.at..self.at + 4]);
        self.at += 4;
        u32::from_le_bytes(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferSizes;
    use crate::config::{Dimensionality, FeatureFlags};

    fn layout() -> RecordLayout {
        RecordLayout::new(Dimensionality::Two, 3, FeatureFlags::default())
    }

    #[test]
    fn test_request_ids_are_stable() {
        let kinds = [
            RequestKind::Terminate,
            RequestKind::RecurData,
            RequestKind::RecurResponse,
            RequestKind::UpdateLabels,
            RequestKind::CollectPixels,
            RequestKind::Ack,
            RequestKind::CollectLabels,
            RequestKind::CollectReply,
        ];
        for (id, kind) in kinds.iter().enumerate() {
            assert_eq!(kind.id() as usize, id);
            assert_eq!(RequestKind::try_from(id as u16).unwrap(), *kind);
        }
        assert!(RequestKind::try_from(8).is_err());
        assert_eq!(RequestKind::Terminate.expected_reply(), None);
    }

    #[test]
    fn test_envelope_frame_roundtrip() {
        let mut payload = MessageBuffer::with_sizes(BufferSizes { ints: 2, doubles: 1, ..BufferSizes::ZERO });
        let mut w = payload.writer();
        w.put_u32_slice(&[4, 5]).unwrap();
        w.put_f64(0.5).unwrap();
        w.finish().unwrap();

        let envelope = Envelope::new(RequestKind::RecurData, 3, 2, 0, &layout())
            .with_value(17)
            .with_section(3)
            .with_payload(payload);
        let bytes = envelope.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], ENVELOPE_MAGIC);
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_terminate_has_empty_payload() {
        let envelope = Envelope::new(RequestKind::Terminate, 0, 4, 2, &layout());
        assert!(envelope.payload.is_empty());
        let restored = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.kind, RequestKind::Terminate);
    }

    #[test]
    fn test_layout_mismatch_is_detected() {
        let envelope = Envelope::new(RequestKind::RecurData, 1, 0, 0, &layout());
        let other = RecordLayout::new(
            Dimensionality::Two,
            3,
            FeatureFlags { edge_image: true, local_std_dev: false },
        );
        assert!(envelope.check_layout(&layout()).is_ok());
        assert!(matches!(
            envelope.check_layout(&other),
            Err(RhsegError::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_corrupt_envelopes_are_rejected() {
        let bytes = Envelope::new(RequestKind::Ack, 1, 0, 0, &layout()).to_bytes().unwrap();
        assert!(Envelope::from_bytes(&bytes[..10]).is_err());

        let mut bad_kind = bytes.clone();
        bad_kind[6] = 99;
        assert!(matches!(Envelope::from_bytes(&bad_kind), Err(RhsegError::FrameFormat(_))));

        let mut bad_magic = bytes;
        bad_magic[0] = b'X';
        assert!(Envelope::from_bytes(&bad_magic).is_err());
    }
}
