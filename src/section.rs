//! Section addressing: maps an offset (or any global pixel coordinate) to the
//! id of the section that owns it.
//!
//! The lookup is a linear scan over the registered offset table. A miss does
//! not raise an error; it yields the sentinel `section_not_found(config)`,
//! which equals the section count (the value a scan loop holds on exit).
//! `try_find_section` turns that sentinel into an `Option` and is what the
//! rest of the crate calls.

use std::ops::Range;

use crate::config::{Dimensionality, RhsegConfig, SectionOffset};
use crate::spatial::Coord;

/// Which part of the offset table a lookup scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Every registered section.
    Global,
    /// Only the sections owned by the given task.
    Local(u32),
}

impl SearchScope {
    /// The scope a bound configuration searches by default: its own sections
    /// when it carries a task identity, the whole table otherwise.
    pub fn for_config(config: &RhsegConfig) -> Self {
        match config.task {
            Some(task) => SearchScope::Local(task.task_id),
            None => SearchScope::Global,
        }
    }
}

/// The out-of-range value returned by `find_section` on a miss.
pub fn section_not_found(config: &RhsegConfig) -> u32 {
    config.nb_sections() as u32
}

/// The table indices scanned for a given scope.
pub fn section_range(config: &RhsegConfig, scope: SearchScope) -> Range<usize> {
    let total = config.nb_sections();
    match scope {
        SearchScope::Global => 0..total,
        SearchScope::Local(task_id) => {
            let per_task = config.sections_per_task();
            let start = (task_id as usize).saturating_mul(per_task).min(total);
            let end = start.saturating_add(per_task).min(total);
            start..end
        }
    }
}

/// Returns the id of the section registered at `offset`, or
/// `section_not_found(config)` when no entry matches.
///
/// Only the coordinates meaningful for the configured dimensionality are
/// compared: the column in 1-D, column and row in 2-D, all three in 3-D.
pub fn find_section(config: &RhsegConfig, offset: SectionOffset, scope: SearchScope) -> u32 {
    for section in section_range(config, scope) {
        let entry = &config.sections[section];
        let matched = match config.dimensionality {
            Dimensionality::One => entry.col == offset.col,
            Dimensionality::Two => entry.col == offset.col && entry.row == offset.row,
            Dimensionality::Three => *entry == offset,
        };
        if matched {
            return section as u32;
        }
    }
    section_not_found(config)
}

/// `find_section` with the sentinel mapped to `None`.
pub fn try_find_section(
    config: &RhsegConfig,
    offset: SectionOffset,
    scope: SearchScope,
) -> Option<u32> {
    let section = find_section(config, offset, scope);
    (section != section_not_found(config)).then_some(section)
}

/// Maps a global pixel coordinate to the section containing it. Returns `None`
/// for coordinates outside the image.
pub fn section_of(config: &RhsegConfig, coord: Coord) -> Option<u32> {
    if coord.col >= config.ncols || coord.row >= config.nrows || coord.slice >= config.nslices {
        return None;
    }
    let shape = config.section_shape;
    let offset = SectionOffset::new(
        coord.col - coord.col % shape.ncols,
        coord.row - coord.row % shape.nrows,
        coord.slice - coord.slice % shape.nslices,
    );
    try_find_section(config, offset, SearchScope::Global)
}

/// Converts a section-local coordinate of `section` into a global one.
pub fn to_global(config: &RhsegConfig, section: u32, local: Coord) -> Option<Coord> {
    let offset = config.sections.get(section as usize)?;
    Some(Coord::new(
        offset.col + local.col,
        offset.row + local.row,
        offset.slice + local.slice,
    ))
}

/// Converts a global coordinate into the local coordinate of `section`, if it
/// lies inside that section.
pub fn to_local(config: &RhsegConfig, section: u32, global: Coord) -> Option<Coord> {
    let offset = config.sections.get(section as usize)?;
    let shape = config.section_shape;
    let local = Coord::new(
        global.col.checked_sub(offset.col)?,
        global.row.checked_sub(offset.row)?,
        global.slice.checked_sub(offset.slice)?,
    );
    (local.col < shape.ncols && local.row < shape.nrows && local.slice < shape.nslices)
        .then_some(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureFlags;

    fn split_2d(levels: u16) -> RhsegConfig {
        RhsegConfig::uniform_split(
            Dimensionality::Two,
            (4, 8, 1),
            1,
            levels,
            FeatureFlags::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_every_registered_offset_is_found() {
        let config = split_2d(3);
        for (id, offset) in config.sections.iter().enumerate() {
            assert_eq!(find_section(&config, *offset, SearchScope::Global), id as u32);
        }
    }

    #[test]
    fn test_miss_returns_section_count_sentinel() {
        let config = split_2d(3);
        let missing = SectionOffset::new(1, 1, 0);
        assert_eq!(find_section(&config, missing, SearchScope::Global), 4);
        assert_eq!(section_not_found(&config), 4);
        assert_eq!(try_find_section(&config, missing, SearchScope::Global), None);
    }

    #[test]
    fn test_local_scope_only_sees_own_sections() {
        let config = split_2d(3).for_task(2);
        let own = config.sections[2];
        let foreign = config.sections[1];
        let scope = SearchScope::for_config(&config);
        assert_eq!(scope, SearchScope::Local(2));
        assert_eq!(section_range(&config, scope), 2..3);
        assert_eq!(find_section(&config, own, scope), 2);
        assert_eq!(find_section(&config, foreign, scope), section_not_found(&config));
    }

    #[test]
    fn test_one_dimensional_lookup_ignores_row_and_slice() {
        let config = RhsegConfig::uniform_split(
            Dimensionality::One,
            (8, 1, 1),
            1,
            2,
            FeatureFlags::default(),
        )
        .unwrap();
        let offset = SectionOffset::new(4, 7, 9);
        assert_eq!(find_section(&config, offset, SearchScope::Global), 1);
    }

    #[test]
    fn test_section_of_and_local_global_conversion() {
        let config = split_2d(3); // four sections of 4x2
        assert_eq!(section_of(&config, Coord::new(3, 5, 0)), Some(2));
        assert_eq!(section_of(&config, Coord::new(4, 0, 0)), None);
        assert_eq!(section_of(&config, Coord::new(0, 8, 0)), None);

        let global = to_global(&config, 2, Coord::new(1, 1, 0)).unwrap();
        assert_eq!(global, Coord::new(1, 5, 0));
        assert_eq!(to_local(&config, 2, global), Some(Coord::new(1, 1, 0)));
        assert_eq!(to_local(&config, 1, global), None);
    }
}
