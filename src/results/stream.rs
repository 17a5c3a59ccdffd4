//! Sequential binary streams of per-level region records.
//!
//! Each level appends one headerless `MessageBuffer` payload to the class
//! stream, holding every active `RegionClass` in label order, and one to the
//! object stream holding every active `RegionObject`. Records are packed with
//! their `WireRecord` implementations, so a level carries the same fields a
//! region carries on the wire: statistics, optional edge and std-dev sums, and
//! neighbor sets. Payloads are little-endian. The streams are not
//! self-describing: the reader needs the `LevelCounts` returned by the writer.

use std::io::{Read, Write};

use crate::buffer::{read_records, sizes_for, write_records, BufferSizes, MessageBuffer, WireRecord};
use crate::error::{BufferKind, RhsegError};
use crate::records::layout::RecordLayout;
use crate::region::{RegionClass, RegionObject, RegionSet};
use crate::results::{LevelCounts, ResultsLevel};

fn check_order(last: Option<u16>, level: u16, action: &str) -> Result<(), RhsegError> {
    match last {
        Some(previous) if level <= previous => Err(RhsegError::Protocol(format!(
            "results level {} {} after level {}",
            level, action, previous
        ))),
        _ => Ok(()),
    }
}

fn check_layout(layout: &RecordLayout) -> Result<(), RhsegError> {
    if layout.nbands == 0 {
        return Err(RhsegError::Config(
            "results records need at least one spectral band".into(),
        ));
    }
    Ok(())
}

/// Array sizes covering the fixed fields of `n` records of type `T`.
fn fixed_sizes<T: WireRecord>(layout: &RecordLayout, n: usize) -> BufferSizes {
    BufferSizes::from_fields(&T::fixed_fields(layout)).scaled(n)
}

/// Rejects counts whose stream sizes cannot hold `n` records of type `T`.
fn check_sizes<T: WireRecord>(
    layout: &RecordLayout,
    n: u32,
    sizes: BufferSizes,
    what: &str,
) -> Result<(), RhsegError> {
    let fixed = fixed_sizes::<T>(layout, n as usize);
    let fits = [
        BufferKind::Byte,
        BufferKind::Short,
        BufferKind::Int,
        BufferKind::Float,
        BufferKind::Double,
    ]
    .into_iter()
    .all(|kind| sizes.get(kind) >= fixed.get(kind));
    if !fits || (n == 0 && !sizes.is_empty()) {
        return Err(RhsegError::FrameFormat(format!(
            "{} {} records cannot occupy {:?}",
            n, what, sizes
        )));
    }
    Ok(())
}

/// Packs `records` into `buffer`, reusing its allocations.
fn pack<T: WireRecord>(
    buffer: &mut MessageBuffer,
    records: &[&T],
    layout: &RecordLayout,
) -> Result<BufferSizes, RhsegError> {
    let sizes = sizes_for(records.iter().copied(), layout);
    buffer.resize(sizes);
    let mut w = buffer.writer();
    write_records(&mut w, records.iter().copied(), layout)?;
    w.finish()?;
    Ok(sizes)
}

/// Reads one payload of `sizes` from `input` and unpacks `n` records.
fn unpack<T: WireRecord, R: Read>(
    input: &mut R,
    buffer: &mut MessageBuffer,
    scratch: &mut Vec<u8>,
    n: u32,
    sizes: BufferSizes,
    layout: &RecordLayout,
) -> Result<Vec<T>, RhsegError> {
    buffer.resize(sizes);
    scratch.clear();
    scratch.resize(sizes.payload_bytes(), 0);
    input.read_exact(scratch.as_mut_slice())?;
    buffer.fill_payload(scratch.as_slice())?;
    let mut r = buffer.reader();
    let records = read_records(&mut r, n as usize, layout)?;
    r.finish()?;
    Ok(records)
}

//==================================================================================
// 1. Writer
//==================================================================================

pub struct ResultsWriter<W: Write> {
    class_out: W,
    object_out: W,
    classes: MessageBuffer,
    objects: MessageBuffer,
    scratch: Vec<u8>,
    last_level: Option<u16>,
}

impl<W: Write> ResultsWriter<W> {
    pub fn new(class_out: W, object_out: W) -> Self {
        Self {
            class_out,
            object_out,
            classes: MessageBuffer::empty(),
            objects: MessageBuffer::empty(),
            scratch: Vec::new(),
            last_level: None,
        }
    }

    /// Reserves room for the fixed fields of `nclasses` classes and
    /// `nobjects` objects. Later levels reuse the reservation.
    pub fn set_buffer_sizes(&mut self, layout: &RecordLayout, nclasses: usize, nobjects: usize) {
        reserve(&mut self.classes, &mut self.scratch, fixed_sizes::<RegionClass>(layout, nclasses));
        reserve(&mut self.objects, &mut self.scratch, fixed_sizes::<RegionObject>(layout, nobjects));
    }

    /// Current capacity of the class and object buffers.
    pub fn buffer_capacity(&self) -> (BufferSizes, BufferSizes) {
        (self.classes.capacity(), self.objects.capacity())
    }

    /// Appends the active classes and objects of `regions` as `level`.
    pub fn write(&mut self, level: u16, regions: &RegionSet) -> Result<LevelCounts, RhsegError> {
        check_order(self.last_level, level, "written")?;
        let layout = *regions.layout();
        check_layout(&layout)?;
        let classes: Vec<&RegionClass> = regions.classes().iter_active().collect();
        let objects: Vec<&RegionObject> = regions.objects().iter_active().collect();

        let class_sizes = pack(&mut self.classes, &classes, &layout)?;
        let object_sizes = pack(&mut self.objects, &objects, &layout)?;
        emit(&self.classes, &mut self.scratch, &mut self.class_out)?;
        emit(&self.objects, &mut self.scratch, &mut self.object_out)?;
        self.last_level = Some(level);

        let counts = LevelCounts {
            level,
            nb_classes: classes.len() as u32,
            nb_objects: objects.len() as u32,
            class_sizes,
            object_sizes,
        };
        log::debug!(
            "results level {}: {} classes ({} bytes), {} objects ({} bytes)",
            level,
            counts.nb_classes,
            class_sizes.payload_bytes(),
            counts.nb_objects,
            object_sizes.payload_bytes()
        );
        Ok(counts)
    }

    pub fn flush(&mut self) -> Result<(), RhsegError> {
        self.class_out.flush()?;
        self.object_out.flush()?;
        Ok(())
    }

    /// Flushes and hands back the two streams.
    pub fn into_inner(mut self) -> Result<(W, W), RhsegError> {
        self.flush()?;
        Ok((self.class_out, self.object_out))
    }
}

fn reserve(buffer: &mut MessageBuffer, scratch: &mut Vec<u8>, sizes: BufferSizes) {
    buffer.reserve(sizes);
    scratch.reserve(sizes.payload_bytes().saturating_sub(scratch.len()));
}

fn emit<W: Write>(buffer: &MessageBuffer, scratch: &mut Vec<u8>, out: &mut W) -> Result<(), RhsegError> {
    scratch.clear();
    buffer.append_payload(scratch);
    out.write_all(scratch.as_slice())?;
    Ok(())
}

//==================================================================================
// 2. Reader
//==================================================================================

pub struct ResultsReader<R: Read> {
    class_in: R,
    object_in: R,
    classes: MessageBuffer,
    objects: MessageBuffer,
    scratch: Vec<u8>,
    last_level: Option<u16>,
}

impl<R: Read> ResultsReader<R> {
    pub fn new(class_in: R, object_in: R) -> Self {
        Self {
            class_in,
            object_in,
            classes: MessageBuffer::empty(),
            objects: MessageBuffer::empty(),
            scratch: Vec::new(),
            last_level: None,
        }
    }

    pub fn set_buffer_sizes(&mut self, layout: &RecordLayout, nclasses: usize, nobjects: usize) {
        reserve(&mut self.classes, &mut self.scratch, fixed_sizes::<RegionClass>(layout, nclasses));
        reserve(&mut self.objects, &mut self.scratch, fixed_sizes::<RegionObject>(layout, nobjects));
    }

    pub fn buffer_capacity(&self) -> (BufferSizes, BufferSizes) {
        (self.classes.capacity(), self.objects.capacity())
    }

    /// Reads the next level. `counts` must be the counts the writer returned
    /// for this level and `layout` the layout of the regions it wrote.
    pub fn read(
        &mut self,
        level: u16,
        counts: LevelCounts,
        layout: &RecordLayout,
    ) -> Result<ResultsLevel, RhsegError> {
        if counts.level != level {
            return Err(RhsegError::Protocol(format!(
                "counts for level {} given to read level {}",
                counts.level, level
            )));
        }
        check_order(self.last_level, level, "read")?;
        check_layout(layout)?;
        check_sizes::<RegionClass>(layout, counts.nb_classes, counts.class_sizes, "class")?;
        check_sizes::<RegionObject>(layout, counts.nb_objects, counts.object_sizes, "object")?;

        let classes = unpack(
            &mut self.class_in,
            &mut self.classes,
            &mut self.scratch,
            counts.nb_classes,
            counts.class_sizes,
            layout,
        )?;
        let objects = unpack(
            &mut self.object_in,
            &mut self.objects,
            &mut self.scratch,
            counts.nb_objects,
            counts.object_sizes,
            layout,
        )?;
        self.last_level = Some(level);
        Ok(ResultsLevel {
            counts,
            classes,
            objects,
        })
    }

    pub fn into_inner(self) -> (R, R) {
        (self.class_in, self.object_in)
    }
}
