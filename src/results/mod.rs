//! Per-level segmentation results, written by the root as the hierarchy is
//! built and read back level by level.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::buffer::BufferSizes;
use crate::error::RhsegError;
use crate::records::layout::RecordLayout;
use crate::region::{RegionClass, RegionObject, RegionSet};

pub mod stream;

pub use stream::{ResultsReader, ResultsWriter};

/// Record counts and stream sizes of one written level. The streams carry
/// neither, so these must be kept to read a level back.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LevelCounts {
    pub level: u16,
    pub nb_classes: u32,
    pub nb_objects: u32,
    pub class_sizes: BufferSizes,
    pub object_sizes: BufferSizes,
}

/// One level as read back.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsLevel {
    pub counts: LevelCounts,
    pub classes: Vec<RegionClass>,
    pub objects: Vec<RegionObject>,
}

/// Paths of the class and object result files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsPaths {
    pub class_path: PathBuf,
    pub object_path: PathBuf,
}

/// The file-backed results store. Output and input sides are independent;
/// each must be opened before use.
#[derive(Default)]
pub struct ResultsStore {
    output: Option<ResultsWriter<BufWriter<File>>>,
    input: Option<ResultsReader<BufReader<File>>>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (truncating) both result files.
    pub fn open_output<P: AsRef<Path>>(&mut self, class_path: P, object_path: P) -> Result<(), RhsegError> {
        let class_out = BufWriter::new(File::create(class_path.as_ref())?);
        let object_out = BufWriter::new(File::create(object_path.as_ref())?);
        self.output = Some(ResultsWriter::new(class_out, object_out));
        log::info!(
            "opened results output {} / {}",
            class_path.as_ref().display(),
            object_path.as_ref().display()
        );
        Ok(())
    }

    pub fn open_input<P: AsRef<Path>>(&mut self, class_path: P, object_path: P) -> Result<(), RhsegError> {
        let class_in = BufReader::new(File::open(class_path.as_ref())?);
        let object_in = BufReader::new(File::open(object_path.as_ref())?);
        self.input = Some(ResultsReader::new(class_in, object_in));
        Ok(())
    }

    pub fn is_output_open(&self) -> bool {
        self.output.is_some()
    }

    /// Pre-sizes the buffers of whichever sides are open.
    pub fn set_buffer_sizes(&mut self, layout: &RecordLayout, nclasses: usize, nobjects: usize) {
        if let Some(output) = self.output.as_mut() {
            output.set_buffer_sizes(layout, nclasses, nobjects);
        }
        if let Some(input) = self.input.as_mut() {
            input.set_buffer_sizes(layout, nclasses, nobjects);
        }
    }

    pub fn write(&mut self, level: u16, regions: &RegionSet) -> Result<LevelCounts, RhsegError> {
        self.output
            .as_mut()
            .ok_or_else(|| not_open("output"))?
            .write(level, regions)
    }

    pub fn read(
        &mut self,
        level: u16,
        counts: LevelCounts,
        layout: &RecordLayout,
    ) -> Result<ResultsLevel, RhsegError> {
        self.input
            .as_mut()
            .ok_or_else(|| not_open("input"))?
            .read(level, counts, layout)
    }

    /// Flushes and closes the output files. A no-op if they are not open.
    pub fn close_output(&mut self) -> Result<(), RhsegError> {
        if let Some(output) = self.output.take() {
            output.into_inner()?;
        }
        Ok(())
    }

    pub fn close_input(&mut self) {
        self.input = None;
    }
}

fn not_open(side: &str) -> RhsegError {
    RhsegError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        format!("results {} is not open", side),
    ))
}
