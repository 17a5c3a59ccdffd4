// In: src/config.rs

//! The single source of truth for the configuration snapshot consumed by the
//! rhseg core.
//!
//! `RhsegConfig` is created once at the application boundary (typically from
//! a JSON document produced by the excluded parameter-file loader) and then
//! passed down through the system via a shared, read-only `Arc<RhsegConfig>`.
//! No component keeps process-wide mutable configuration state.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RhsegError;
use crate::records::layout::RecordLayout;

/// Upper bound on the recursion depth. 2^15 tasks is far beyond any real run
/// and keeps section ids inside the `i16` short slot of index records.
pub const MAX_ONB_LEVELS: u16 = 16;

//==================================================================================
// I. Core Configuration Enums & Structs
//==================================================================================

/// The dimensionality of the image grid. Drives neighbor connectivity
/// (2, 4 or 6 neighbors) and how many offset coordinates addressing compares.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Dimensionality {
    One,
    Two,
    Three,
}

impl Dimensionality {
    /// Number of face-adjacent neighbors of an interior pixel.
    pub fn connectivity(&self) -> usize {
        match self {
            Dimensionality::One => 2,
            Dimensionality::Two => 4,
            Dimensionality::Three => 6,
        }
    }

    pub fn rank(&self) -> u8 {
        u8::from(*self)
    }
}

impl TryFrom<u8> for Dimensionality {
    type Error = RhsegError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Dimensionality::One),
            2 => Ok(Dimensionality::Two),
            3 => Ok(Dimensionality::Three),
            other => Err(RhsegError::Config(format!(
                "dimensionality must be 1, 2 or 3, got {}",
                other
            ))),
        }
    }
}

impl From<Dimensionality> for u8 {
    fn from(value: Dimensionality) -> Self {
        match value {
            Dimensionality::One => 1,
            Dimensionality::Two => 2,
            Dimensionality::Three => 3,
        }
    }
}

impl std::fmt::Display for Dimensionality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-D", self.rank())
    }
}

/// The registered offset of one section inside the full image.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SectionOffset {
    pub col: u32,
    #[serde(default)]
    pub row: u32,
    #[serde(default)]
    pub slice: u32,
}

impl SectionOffset {
    pub fn new(col: u32, row: u32, slice: u32) -> Self {
        Self { col, row, slice }
    }
}

/// The extent of every section. All sections share one shape.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionShape {
    pub ncols: u32,
    #[serde(default = "default_one")]
    pub nrows: u32,
    #[serde(default = "default_one")]
    pub nslices: u32,
}

impl SectionShape {
    pub fn npixels(&self) -> usize {
        self.ncols as usize * self.nrows as usize * self.nslices as usize
    }
}

/// Optional per-pixel feature fields. Both ends of every link must agree on
/// these, since they change the wire layout of pixel and region records.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Pixels carry an edge value and edge validity mask.
    #[serde(default)]
    pub edge_image: bool,
    /// Pixels carry per-band local standard deviations and a validity mask.
    #[serde(default)]
    pub local_std_dev: bool,
}

/// The identity of the task holding this snapshot when running distributed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIdentity {
    pub task_id: u32,
    pub nb_tasks: u32,
}

//==================================================================================
// II. The Unified RhsegConfig
//==================================================================================

/// The read-only configuration snapshot shared by every core component.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RhsegConfig {
    pub dimensionality: Dimensionality,

    pub ncols: u32,
    #[serde(default = "default_one")]
    pub nrows: u32,
    #[serde(default = "default_one")]
    pub nslices: u32,

    #[serde(default = "default_one")]
    pub nbands: u32,

    /// Number of recursion levels taking part in the distributed merge.
    /// Level 0 is the finest partition; level `onb_levels - 1` is the root.
    pub onb_levels: u16,

    pub section_shape: SectionShape,

    /// The per-section column/row/slice offset table.
    pub sections: Vec<SectionOffset>,

    /// `None` when the snapshot is not bound to a particular task.
    #[serde(default)]
    pub task: Option<TaskIdentity>,

    #[serde(default)]
    pub flags: FeatureFlags,
}

impl RhsegConfig {
    /// Parses and validates a configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, RhsegError> {
        let config: RhsegConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, RhsegError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Builds a configuration whose sections are a regular binary split of the
    /// image along its slowest-varying axis (columns in 1-D, rows in 2-D,
    /// slices in 3-D). Produces `2^(onb_levels - 1)` sections, one per task.
    pub fn uniform_split(
        dimensionality: Dimensionality,
        (ncols, nrows, nslices): (u32, u32, u32),
        nbands: u32,
        onb_levels: u16,
        flags: FeatureFlags,
    ) -> Result<Self, RhsegError> {
        if onb_levels == 0 || onb_levels > MAX_ONB_LEVELS {
            return Err(RhsegError::Config(format!(
                "onb_levels must be in 1..={}, got {}",
                MAX_ONB_LEVELS, onb_levels
            )));
        }
        let nb_sections = 1u32 << (onb_levels - 1);
        let axis_len = match dimensionality {
            Dimensionality::One => ncols,
            Dimensionality::Two => nrows,
            Dimensionality::Three => nslices,
        };
        if axis_len == 0 || axis_len % nb_sections != 0 {
            return Err(RhsegError::Config(format!(
                "split axis of length {} cannot be divided into {} sections",
                axis_len, nb_sections
            )));
        }
        let step = axis_len / nb_sections;

        let (section_shape, sections) = match dimensionality {
            Dimensionality::One => (
                SectionShape { ncols: step, nrows: 1, nslices: 1 },
                (0..nb_sections)
                    .map(|s| SectionOffset::new(s * step, 0, 0))
                    .collect(),
            ),
            Dimensionality::Two => (
                SectionShape { ncols, nrows: step, nslices: 1 },
                (0..nb_sections)
                    .map(|s| SectionOffset::new(0, s * step, 0))
                    .collect(),
            ),
            Dimensionality::Three => (
                SectionShape { ncols, nrows, nslices: step },
                (0..nb_sections)
                    .map(|s| SectionOffset::new(0, 0, s * step))
                    .collect(),
            ),
        };

        let config = RhsegConfig {
            dimensionality,
            ncols,
            nrows,
            nslices,
            nbands,
            onb_levels,
            section_shape,
            sections,
            task: None,
            flags,
        };
        config.validate()?;
        Ok(config)
    }

    /// Returns a copy of this snapshot bound to `task_id`.
    pub fn for_task(&self, task_id: u32) -> Self {
        let mut bound = self.clone();
        bound.task = Some(TaskIdentity {
            task_id,
            nb_tasks: self.nb_tree_tasks(),
        });
        bound
    }

    pub fn nb_sections(&self) -> usize {
        self.sections.len()
    }

    /// Number of tasks in the binary recursion tree: `2^(onb_levels - 1)`.
    pub fn nb_tree_tasks(&self) -> u32 {
        1u32 << self.onb_levels.saturating_sub(1)
    }

    /// Number of sections each task is responsible for.
    pub fn sections_per_task(&self) -> usize {
        let tasks = self
            .task
            .map(|t| t.nb_tasks)
            .unwrap_or_else(|| self.nb_tree_tasks()) as usize;
        (self.nb_sections() / tasks.max(1)).max(1)
    }

    pub fn three_dimensional(&self) -> bool {
        self.dimensionality == Dimensionality::Three
    }

    pub fn npixels(&self) -> usize {
        self.ncols as usize * self.nrows as usize * self.nslices as usize
    }

    pub fn section_npixels(&self) -> usize {
        self.section_shape.npixels()
    }

    /// The wire layout every record exchanged under this configuration uses.
    pub fn layout(&self) -> RecordLayout {
        RecordLayout::new(self.dimensionality, self.nbands as usize, self.flags)
    }

    /// Checks the internal consistency of the snapshot.
    pub fn validate(&self) -> Result<(), RhsegError> {
        let fail = |msg: String| Err(RhsegError::Config(msg));

        if self.onb_levels == 0 || self.onb_levels > MAX_ONB_LEVELS {
            return fail(format!(
                "onb_levels must be in 1..={}, got {}",
                MAX_ONB_LEVELS, self.onb_levels
            ));
        }
        if self.nbands == 0 {
            return fail("nbands must be at least 1".to_string());
        }
        if self.ncols == 0 || self.nrows == 0 || self.nslices == 0 {
            return fail("image dimensions must be non-zero".to_string());
        }
        match self.dimensionality {
            Dimensionality::One if self.nrows != 1 || self.nslices != 1 => {
                return fail("a 1-D image must have nrows == nslices == 1".to_string());
            }
            Dimensionality::Two if self.nslices != 1 => {
                return fail("a 2-D image must have nslices == 1".to_string());
            }
            _ => {}
        }

        let shape = self.section_shape;
        if shape.ncols == 0 || shape.nrows == 0 || shape.nslices == 0 {
            return fail("section shape must be non-zero".to_string());
        }
        if self.sections.is_empty() {
            return fail("the section offset table is empty".to_string());
        }
        if self.sections.len() > i16::MAX as usize {
            return fail(format!(
                "{} sections exceed the index-record section field",
                self.sections.len()
            ));
        }

        let fits = |start: u32, len: u32, total: u32| {
            start.checked_add(len).is_some_and(|end| end <= total)
        };
        let mut seen = hashbrown::HashSet::with_capacity(self.sections.len());
        for (id, off) in self.sections.iter().enumerate() {
            if off.col % shape.ncols != 0
                || off.row % shape.nrows != 0
                || off.slice % shape.nslices != 0
            {
                return fail(format!(
                    "section {} offset {:?} is not aligned to the section shape",
                    id, off
                ));
            }
            if !fits(off.col, shape.ncols, self.ncols)
                || !fits(off.row, shape.nrows, self.nrows)
                || !fits(off.slice, shape.nslices, self.nslices)
            {
                return fail(format!("section {} at {:?} extends past the image", id, off));
            }
            if !seen.insert(*off) {
                return fail(format!("section {} duplicates offset {:?}", id, off));
            }
        }
        if self.sections.len().checked_mul(shape.npixels()) != Some(self.npixels()) {
            return fail(format!(
                "{} sections of {} pixels do not tile an image of {} pixels",
                self.sections.len(),
                shape.npixels(),
                self.npixels()
            ));
        }

        if let Some(task) = self.task {
            if task.nb_tasks == 0 || task.task_id >= task.nb_tasks {
                return fail(format!(
                    "task id {} out of range for {} tasks",
                    task.task_id, task.nb_tasks
                ));
            }
            if self.sections.len() % task.nb_tasks as usize != 0 {
                return fail(format!(
                    "{} sections cannot be shared evenly by {} tasks",
                    self.sections.len(),
                    task.nb_tasks
                ));
            }
        }
        Ok(())
    }
}

/// Helper for `serde` to default an extent to one.
fn default_one() -> u32 {
    1
}

//==================================================================================
// III. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_split_2d_rows() {
        let config = RhsegConfig::uniform_split(
            Dimensionality::Two,
            (4, 4, 1),
            1,
            2,
            FeatureFlags::default(),
        )
        .unwrap();
        assert_eq!(config.nb_sections(), 2);
        assert_eq!(config.section_shape, SectionShape { ncols: 4, nrows: 2, nslices: 1 });
        assert_eq!(config.sections[1], SectionOffset::new(0, 2, 0));
        assert_eq!(config.nb_tree_tasks(), 2);
        assert_eq!(config.sections_per_task(), 1);
    }

    #[test]
    fn test_uniform_split_rejects_uneven_axis() {
        let result = RhsegConfig::uniform_split(
            Dimensionality::Two,
            (4, 6, 1),
            1,
            3,
            FeatureFlags::default(),
        );
        assert!(matches!(result, Err(RhsegError::Config(_))));
    }

    #[test]
    fn test_json_roundtrip_and_defaults() {
        let json = r#"{
            "dimensionality": 2,
            "ncols": 4,
            "nrows": 4,
            "onb_levels": 2,
            "section_shape": { "ncols": 4, "nrows": 2 },
            "sections": [ { "col": 0, "row": 0 }, { "col": 0, "row": 2 } ],
            "flags": { "edge_image": true }
        }"#;
        let config = RhsegConfig::from_json_str(json).unwrap();
        assert_eq!(config.nslices, 1);
        assert_eq!(config.nbands, 1);
        assert!(config.flags.edge_image);
        assert!(!config.flags.local_std_dev);
        assert!(config.task.is_none());

        let text = serde_json::to_string(&config).unwrap();
        let again = RhsegConfig::from_json_str(&text).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn test_invalid_dimensionality_is_rejected() {
        let json = r#"{
            "dimensionality": 4, "ncols": 2, "onb_levels": 1,
            "section_shape": { "ncols": 2 }, "sections": [ { "col": 0 } ]
        }"#;
        assert!(RhsegConfig::from_json_str(json).is_err());
    }

    #[test]
    fn test_validate_catches_gaps_and_overlaps() {
        let mut config = RhsegConfig::uniform_split(
            Dimensionality::Two,
            (4, 4, 1),
            1,
            2,
            FeatureFlags::default(),
        )
        .unwrap();
        config.sections[1] = SectionOffset::new(0, 0, 0);
        assert!(config.validate().is_err());

        config.sections[1] = SectionOffset::new(0, 4, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_offsets_near_the_integer_limit_are_rejected() {
        let mut config = RhsegConfig::uniform_split(
            Dimensionality::Two,
            (4, 4, 1),
            1,
            2,
            FeatureFlags::default(),
        )
        .unwrap();
        config.sections[1] = SectionOffset::new(0, u32::MAX - 1, 0);
        assert!(matches!(config.validate(), Err(RhsegError::Config(_))));
    }

    #[test]
    fn test_for_task_binds_identity() {
        let config = RhsegConfig::uniform_split(
            Dimensionality::Three,
            (2, 2, 8),
            2,
            3,
            FeatureFlags::default(),
        )
        .unwrap();
        let bound = config.for_task(3);
        assert_eq!(bound.task, Some(TaskIdentity { task_id: 3, nb_tasks: 4 }));
        assert!(bound.validate().is_ok());
        assert!(bound.three_dimensional());
    }
}
