//! The Typed Message Buffer: five parallel arrays (byte, short, int, float,
//! double) carrying one inbound or outbound inter-task message.
//!
//! Buffers are allocated to the exact element counts a given exchange needs.
//! Those counts come from one shared sizing formula per record type
//! (`WireRecord::wire_sizes`), so sender and receiver cannot drift apart.
//! Cursors are never threaded by hand: a `BufferWriter` or `BufferReader`
//! owns one cursor per array and is bound to a single buffer.
//!
//! Overrunning an array is a sizing defect on the caller's side. It is
//! reported as `RhsegError::BufferOverrun` rather than silently corrupting
//! neighboring fields, and `finish()` reports any unconsumed tail.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::error::{BufferKind, RhsegError};
use crate::records::layout::RecordLayout;

pub mod wire;

//==================================================================================
// 1. Sizing
//==================================================================================

/// Element counts for each of the five arrays.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferSizes {
    pub bytes: usize,
    pub shorts: usize,
    pub ints: usize,
    pub floats: usize,
    pub doubles: usize,
}

impl BufferSizes {
    pub const ZERO: BufferSizes = BufferSizes {
        bytes: 0,
        shorts: 0,
        ints: 0,
        floats: 0,
        doubles: 0,
    };

    /// Sums a list of field descriptors into per-array counts.
    pub fn from_fields(fields: &[FieldDescriptor]) -> Self {
        fields.iter().fold(Self::ZERO, |mut acc, field| {
            *acc.slot_mut(field.kind) += field.count;
            acc
        })
    }

    /// The sizes of `n` identical fixed-layout records.
    pub fn scaled(self, n: usize) -> Self {
        BufferSizes {
            bytes: self.bytes * n,
            shorts: self.shorts * n,
            ints: self.ints * n,
            floats: self.floats * n,
            doubles: self.doubles * n,
        }
    }

    pub fn get(&self, kind: BufferKind) -> usize {
        match kind {
            BufferKind::Byte => self.bytes,
            BufferKind::Short => self.shorts,
            BufferKind::Int => self.ints,
            BufferKind::Float => self.floats,
            BufferKind::Double => self.doubles,
        }
    }

    fn slot_mut(&mut self, kind: BufferKind) -> &mut usize {
        match kind {
            BufferKind::Byte => &mut self.bytes,
            BufferKind::Short => &mut self.shorts,
            BufferKind::Int => &mut self.ints,
            BufferKind::Float => &mut self.floats,
            BufferKind::Double => &mut self.doubles,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::ZERO
    }
}

impl Add for BufferSizes {
    type Output = BufferSizes;

    fn add(self, rhs: BufferSizes) -> BufferSizes {
        BufferSizes {
            bytes: self.bytes + rhs.bytes,
            shorts: self.shorts + rhs.shorts,
            ints: self.ints + rhs.ints,
            floats: self.floats + rhs.floats,
            doubles: self.doubles + rhs.doubles,
        }
    }
}

impl AddAssign for BufferSizes {
    fn add_assign(&mut self, rhs: BufferSizes) {
        *self = *self + rhs;
    }
}

impl Sum for BufferSizes {
    fn sum<I: Iterator<Item = BufferSizes>>(iter: I) -> Self {
        iter.fold(BufferSizes::ZERO, Add::add)
    }
}

/// One named field (or fixed-length run of fields) of a record, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: BufferKind,
    pub count: usize,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, kind: BufferKind, count: usize) -> Self {
        Self { name, kind, count }
    }
}

//==================================================================================
// 2. The Buffer
//==================================================================================

/// The five-array payload of one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageBuffer {
    pub(crate) bytes: Vec<u8>,
    pub(crate) shorts: Vec<i16>,
    pub(crate) ints: Vec<u32>,
    pub(crate) floats: Vec<f32>,
    pub(crate) doubles: Vec<f64>,
}

impl MessageBuffer {
    /// An empty buffer, used for zero-payload requests such as termination.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Allocates zero-filled arrays of exactly the requested lengths.
    pub fn with_sizes(sizes: BufferSizes) -> Self {
        Self {
            bytes: vec![0; sizes.bytes],
            shorts: vec![0; sizes.shorts],
            ints: vec![0; sizes.ints],
            floats: vec![0.0; sizes.floats],
            doubles: vec![0.0; sizes.doubles],
        }
    }

    /// Zero-fills the arrays to exactly `sizes`, keeping their allocations.
    pub fn resize(&mut self, sizes: BufferSizes) {
        fn refill<T: Copy>(array: &mut Vec<T>, len: usize, zero: T) {
            array.clear();
            array.resize(len, zero);
        }
        refill(&mut self.bytes, sizes.bytes, 0);
        refill(&mut self.shorts, sizes.shorts, 0);
        refill(&mut self.ints, sizes.ints, 0);
        refill(&mut self.floats, sizes.floats, 0.0);
        refill(&mut self.doubles, sizes.doubles, 0.0);
    }

    /// Grows the allocations to hold at least `sizes` without reallocating.
    pub fn reserve(&mut self, sizes: BufferSizes) {
        fn grow<T>(array: &mut Vec<T>, capacity: usize) {
            array.reserve(capacity.saturating_sub(array.len()));
        }
        grow(&mut self.bytes, sizes.bytes);
        grow(&mut self.shorts, sizes.shorts);
        grow(&mut self.ints, sizes.ints);
        grow(&mut self.floats, sizes.floats);
        grow(&mut self.doubles, sizes.doubles);
    }

    /// Element counts the arrays can hold without reallocating.
    pub fn capacity(&self) -> BufferSizes {
        BufferSizes {
            bytes: self.bytes.capacity(),
            shorts: self.shorts.capacity(),
            ints: self.ints.capacity(),
            floats: self.floats.capacity(),
            doubles: self.doubles.capacity(),
        }
    }

    pub fn sizes(&self) -> BufferSizes {
        BufferSizes {
            bytes: self.bytes.len(),
            shorts: self.shorts.len(),
            ints: self.ints.len(),
            floats: self.floats.len(),
            doubles: self.doubles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sizes().is_empty()
    }

    pub fn writer(&mut self) -> BufferWriter<'_> {
        BufferWriter {
            buf: self,
            cursors: BufferSizes::ZERO,
        }
    }

    pub fn reader(&self) -> BufferReader<'_> {
        BufferReader {
            buf: self,
            cursors: BufferSizes::ZERO,
        }
    }

    fn len_of(&self, kind: BufferKind) -> usize {
        self.sizes().get(kind)
    }
}

//==================================================================================
// 3. Cursor-Owning Writer / Reader
//==================================================================================

/// Writes fields sequentially into a `MessageBuffer`, one cursor per array.
pub struct BufferWriter<'a> {
    buf: &'a mut MessageBuffer,
    cursors: BufferSizes,
}

/// Reads fields sequentially from a `MessageBuffer`, one cursor per array.
pub struct BufferReader<'a> {
    buf: &'a MessageBuffer,
    cursors: BufferSizes,
}

/// Reserves `n` elements of `kind`, returning the start position.
fn claim(
    cursors: &mut BufferSizes,
    kind: BufferKind,
    n: usize,
    len: usize,
) -> Result<usize, RhsegError> {
    let cursor = cursors.get(kind);
    if cursor + n > len {
        return Err(RhsegError::BufferOverrun {
            kind,
            cursor,
            requested: n,
            len,
        });
    }
    *cursors.slot_mut(kind) += n;
    Ok(cursor)
}

fn check_consumed(cursors: &BufferSizes, lens: &BufferSizes) -> Result<(), RhsegError> {
    for kind in [
        BufferKind::Byte,
        BufferKind::Short,
        BufferKind::Int,
        BufferKind::Float,
        BufferKind::Double,
    ] {
        let remaining = lens.get(kind) - cursors.get(kind);
        if remaining != 0 {
            return Err(RhsegError::TrailingElements { kind, remaining });
        }
    }
    Ok(())
}

// Generates the scalar and slice accessors for one array.
macro_rules! impl_buffer_lane {
    ($field:ident, $kind:expr, $T:ty, $put:ident, $put_slice:ident, $get:ident, $get_vec:ident) => {
        impl<'a> BufferWriter<'a> {
            pub fn $put(&mut self, value: $T) -> Result<(), RhsegError> {
                let len = self.buf.$field.len();
                let at = claim(&mut self.cursors, $kind, 1, len)?;
                self.buf.$field[at] = value;
                Ok(())
            }

            pub fn $put_slice(&mut self, values: &[$T]) -> Result<(), RhsegError> {
                let len = self.buf.$field.len();
                let at = claim(&mut self.cursors, $kind, values.len(), len)?;
                self.buf.$field[at..at + values.len()].copy_from_slice(values);
                Ok(())
            }
        }

        impl<'a> BufferReader<'a> {
            pub fn $get(&mut self) -> Result<$T, RhsegError> {
                let at = claim(&mut self.cursors, $kind, 1, self.buf.$field.len())?;
                Ok(self.buf.$field[at])
            }

            pub fn $get_vec(&mut self, n: usize) -> Result<Vec<$T>, RhsegError> {
                let at = claim(&mut self.cursors, $kind, n, self.buf.$field.len())?;
                Ok(self.buf.$field[at..at + n].to_vec())
            }
        }
    };
}

impl_buffer_lane!(bytes, BufferKind::Byte, u8, put_u8, put_u8_slice, get_u8, get_u8_vec);
impl_buffer_lane!(shorts, BufferKind::Short, i16, put_i16, put_i16_slice, get_i16, get_i16_vec);
impl_buffer_lane!(ints, BufferKind::Int, u32, put_u32, put_u32_slice, get_u32, get_u32_vec);
impl_buffer_lane!(floats, BufferKind::Float, f32, put_f32, put_f32_slice, get_f32, get_f32_vec);
impl_buffer_lane!(doubles, BufferKind::Double, f64, put_f64, put_f64_slice, get_f64, get_f64_vec);

impl<'a> BufferWriter<'a> {
    /// Booleans travel in the byte array as 0/1.
    pub fn put_bool(&mut self, value: bool) -> Result<(), RhsegError> {
        self.put_u8(u8::from(value))
    }

    /// Counts and labels travel in the int array.
    pub fn put_count(&mut self, value: usize, what: &str) -> Result<(), RhsegError> {
        self.put_u32(crate::utils::checked_u32(value, what)?)
    }

    /// Current per-array positions.
    pub fn position(&self) -> BufferSizes {
        self.cursors
    }

    /// Confirms every array was filled exactly.
    pub fn finish(self) -> Result<(), RhsegError> {
        check_consumed(&self.cursors, &self.buf.sizes())
    }
}

impl<'a> BufferReader<'a> {
    pub fn get_bool(&mut self) -> Result<bool, RhsegError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RhsegError::FrameFormat(format!(
                "invalid boolean byte {} in message buffer",
                other
            ))),
        }
    }

    pub fn get_count(&mut self) -> Result<usize, RhsegError> {
        Ok(self.get_u32()? as usize)
    }

    pub fn position(&self) -> BufferSizes {
        self.cursors
    }

    /// Elements of `kind` not yet read.
    pub fn remaining(&self, kind: BufferKind) -> usize {
        self.buf.len_of(kind) - self.cursors.get(kind)
    }

    /// Confirms every array was consumed exactly.
    pub fn finish(self) -> Result<(), RhsegError> {
        check_consumed(&self.cursors, &self.buf.sizes())
    }
}

//==================================================================================
// 4. Record Serialization Contract
//==================================================================================

/// A record that can be packed into and unpacked from a `MessageBuffer`.
///
/// One implementation serves both directions, so the field order on the
/// sending side is by construction the field order on the receiving side.
pub trait WireRecord: Sized {
    /// The fixed-count fields of this record, in wire order.
    fn fixed_fields(layout: &RecordLayout) -> Vec<FieldDescriptor>;

    /// The exact number of elements this instance occupies. Records with
    /// variable-length parts (neighbor sets) override this.
    fn wire_sizes(&self, layout: &RecordLayout) -> BufferSizes {
        BufferSizes::from_fields(&Self::fixed_fields(layout))
    }

    fn write_to(&self, w: &mut BufferWriter<'_>, layout: &RecordLayout) -> Result<(), RhsegError>;

    fn read_from(r: &mut BufferReader<'_>, layout: &RecordLayout) -> Result<Self, RhsegError>;
}

/// Sizing formula for a run of records.
pub fn sizes_for<'r, T, I>(records: I, layout: &RecordLayout) -> BufferSizes
where
    T: WireRecord + 'r,
    I: IntoIterator<Item = &'r T>,
{
    records.into_iter().map(|r| r.wire_sizes(layout)).sum()
}

/// Writes a run of records in order.
pub fn write_records<'r, T, I>(
    w: &mut BufferWriter<'_>,
    records: I,
    layout: &RecordLayout,
) -> Result<(), RhsegError>
where
    T: WireRecord + 'r,
    I: IntoIterator<Item = &'r T>,
{
    for record in records {
        record.write_to(w, layout)?;
    }
    Ok(())
}

/// Reads `n` records in order.
pub fn read_records<T: WireRecord>(
    r: &mut BufferReader<'_>,
    n: usize,
    layout: &RecordLayout,
) -> Result<Vec<T>, RhsegError> {
    (0..n).map(|_| T::read_from(r, layout)).collect()
}

//==================================================================================
// 5. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fields_sums_per_kind() {
        let fields = [
            FieldDescriptor::new("flag", BufferKind::Byte, 1),
            FieldDescriptor::new("label", BufferKind::Int, 1),
            FieldDescriptor::new("values", BufferKind::Float, 3),
            FieldDescriptor::new("count", BufferKind::Int, 2),
        ];
        let sizes = BufferSizes::from_fields(&fields);
        assert_eq!(
            sizes,
            BufferSizes { bytes: 1, shorts: 0, ints: 3, floats: 3, doubles: 0 }
        );
        assert_eq!(sizes.scaled(4).ints, 12);
    }

    #[test]
    fn test_writer_reader_symmetry() {
        let sizes = BufferSizes { bytes: 1, shorts: 1, ints: 2, floats: 2, doubles: 1 };
        let mut buf = MessageBuffer::with_sizes(sizes);
        {
            let mut w = buf.writer();
            w.put_bool(true).unwrap();
            w.put_i16(-7).unwrap();
            w.put_u32_slice(&[11, 12]).unwrap();
            w.put_f32_slice(&[0.5, 1.5]).unwrap();
            w.put_f64(2.25).unwrap();
            w.finish().unwrap();
        }
        let mut r = buf.reader();
        assert!(r.get_bool().unwrap());
        assert_eq!(r.get_i16().unwrap(), -7);
        assert_eq!(r.get_u32_vec(2).unwrap(), vec![11, 12]);
        assert_eq!(r.get_f32_vec(2).unwrap(), vec![0.5, 1.5]);
        assert_eq!(r.get_f64().unwrap(), 2.25);
        r.finish().unwrap();
    }

    #[test]
    fn test_overrun_is_reported() {
        let mut buf = MessageBuffer::with_sizes(BufferSizes { ints: 1, ..BufferSizes::ZERO });
        let mut w = buf.writer();
        w.put_u32(1).unwrap();
        let err = w.put_u32(2).unwrap_err();
        assert!(matches!(
            err,
            RhsegError::BufferOverrun { kind: BufferKind::Int, cursor: 1, requested: 1, len: 1 }
        ));
    }

    #[test]
    fn test_finish_reports_trailing_elements() {
        let buf = MessageBuffer::with_sizes(BufferSizes { doubles: 3, ..BufferSizes::ZERO });
        let mut r = buf.reader();
        r.get_f64().unwrap();
        assert_eq!(r.remaining(BufferKind::Double), 2);
        assert!(matches!(
            r.finish(),
            Err(RhsegError::TrailingElements { kind: BufferKind::Double, remaining: 2 })
        ));
    }

    #[test]
    fn test_invalid_bool_byte_is_rejected() {
        let mut buf = MessageBuffer::with_sizes(BufferSizes { bytes: 1, ..BufferSizes::ZERO });
        buf.writer().put_u8(9).unwrap();
        assert!(matches!(buf.reader().get_bool(), Err(RhsegError::FrameFormat(_))));
    }
}
