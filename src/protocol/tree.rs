//! The binary recursion tree over `2^(onb_levels - 1)` tasks.
//!
//! At level `L`, task `t` receives from `t + 2^L` when `t % 2^(L+1) == 0`,
//! and sends to `t - 2^L` when `t % 2^(L+1) == 2^L`. A task sends exactly
//! once, at the level equal to its trailing zero count, and serves from
//! then on. Task 0 never sends and is the root.

use std::ops::Range;

use crate::config::{RhsegConfig, MAX_ONB_LEVELS};
use crate::error::RhsegError;

/// What a task does at one recursion level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelRole {
    /// Integrates the data of `child`.
    Receiver { child: u32 },
    /// Ships its data to `parent`.
    Sender { parent: u32 },
    /// Already sent at a lower level; only serves requests.
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursionTree {
    onb_levels: u16,
}

impl RecursionTree {
    pub fn new(onb_levels: u16) -> Result<Self, RhsegError> {
        if onb_levels == 0 || onb_levels > MAX_ONB_LEVELS {
            return Err(RhsegError::Config(format!(
                "onb_levels must be in 1..={}, got {}",
                MAX_ONB_LEVELS, onb_levels
            )));
        }
        Ok(Self { onb_levels })
    }

    pub fn from_config(config: &RhsegConfig) -> Result<Self, RhsegError> {
        Self::new(config.onb_levels)
    }

    pub fn onb_levels(&self) -> u16 {
        self.onb_levels
    }

    pub fn nb_tasks(&self) -> u32 {
        1 << (self.onb_levels - 1)
    }

    /// The root's final level; no exchange happens at it.
    pub fn top_level(&self) -> u16 {
        self.onb_levels - 1
    }

    pub fn root(&self) -> u32 {
        0
    }

    pub fn contains(&self, task: u32) -> bool {
        task < self.nb_tasks()
    }

    /// The role of `task` at `level`, for `level < top_level()`.
    pub fn role(&self, task: u32, level: u16) -> LevelRole {
        let span = 1u32 << level;
        match task % (span << 1) {
            0 => LevelRole::Receiver { child: task + span },
            r if r == span => LevelRole::Sender { parent: task - span },
            _ => LevelRole::Server,
        }
    }

    /// The level at which `task` sends its data; `None` for the root.
    pub fn send_level(&self, task: u32) -> Option<u16> {
        (task != 0).then(|| task.trailing_zeros() as u16)
    }

    /// The level up to which `task` receives: its send level, or the top
    /// level for the root.
    pub fn last_receive_level(&self, task: u32) -> u16 {
        self.send_level(task).unwrap_or(self.top_level())
    }

    pub fn parent(&self, task: u32) -> Option<(u16, u32)> {
        let level = self.send_level(task)?;
        Some((level, task - (1 << level)))
    }

    /// `(level, child)` pairs in the order the task receives them.
    pub fn children(&self, task: u32) -> Vec<(u16, u32)> {
        (0..self.last_receive_level(task))
            .map(|level| (level, task + (1 << level)))
            .collect()
    }

    /// Tasks whose data `task` holds once it has integrated `level`.
    pub fn subtree_after(&self, task: u32, level: u16) -> Range<u32> {
        task..task + (2u32 << level)
    }
}
