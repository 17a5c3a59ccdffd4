//! One task of the recursive segmentation protocol.
//!
//! A task segments its own section, then walks up the recursion tree: at
//! every level where it is a receiver it integrates one child's regions,
//! and at its send level it ships everything it holds to its parent and
//! turns into a server. The root instead finishes the run: a last merge,
//! the label-map broadcast, optional gathers and the termination sweep.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashSet;

use crate::buffer::MessageBuffer;
use crate::config::RhsegConfig;
use crate::error::RhsegError;
use crate::protocol::merge::MergeDecision;
use crate::protocol::request::{Envelope, RequestKind};
use crate::protocol::section_data::{
    label_blocks_sizes, pixel_blocks_sizes, read_label_blocks, read_pixel_blocks, read_recur_data,
    recur_data_sizes, write_label_blocks, write_pixel_blocks, write_recur_data, BorderStore,
    LabelBlock, LabelMaps, PixelBlock, RecurResponse, SectionData,
};
use crate::protocol::segmentation::SegmentationMap;
use crate::protocol::transport::Transport;
use crate::protocol::tree::{LevelRole, RecursionTree};
use crate::records::layout::RecordLayout;
use crate::records::pixel::Pixel;
use crate::region::{LabelOffsets, RegionSet};
use crate::results::{LevelCounts, ResultsPaths, ResultsStore};

//==================================================================================
// 1. Task Bookkeeping
//==================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Local work on the task's own regions.
    Segmenting,
    /// Waiting for requests from the parent.
    ActiveServer,
    /// Blocked on the reply to an outgoing request.
    Requesting,
    /// Integrating a child's data.
    Merging,
    Terminated,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Segmenting => "segmenting",
            TaskState::ActiveServer => "active-server",
            TaskState::Requesting => "requesting",
            TaskState::Merging => "merging",
            TaskState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// A child whose data this task integrated, and where its labels landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLink {
    pub task: u32,
    pub level: u16,
    pub offsets: LabelOffsets,
    pub class_count: u32,
    pub object_count: u32,
}

/// The parent this task sent its data to, and its answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParentLink {
    pub parent: u32,
    pub level: u16,
    pub response: RecurResponse,
}

/// What one task did over a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub task_id: u32,
    pub final_state: TaskState,
    pub terminations_received: u32,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub send_level: Option<u16>,
    pub threshold: f32,
}

/// What the root does once the top level is reached.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Gather every section's final labels into a `SegmentationMap`.
    pub collect_labels: bool,
    /// Gather every section's pixels, relabelled with their final class.
    pub collect_pixels: bool,
    /// Write one results level per root merge step.
    pub results: Option<ResultsPaths>,
}

#[derive(Debug, Clone)]
pub struct RootOutcome {
    pub regions: RegionSet,
    pub segmentation: Option<SegmentationMap>,
    pub pixels: Option<Vec<PixelBlock>>,
    pub level_counts: Vec<LevelCounts>,
    pub threshold: f32,
}

//==================================================================================
// 2. The Task
//==================================================================================

pub struct RecursiveTask<T: Transport> {
    config: Arc<RhsegConfig>,
    tree: RecursionTree,
    layout: RecordLayout,
    transport: T,
    task_id: u32,
    state: TaskState,
    section: SectionData,
    regions: RegionSet,
    border: BorderStore,
    children: Vec<ChildLink>,
    parent: Option<ParentLink>,
    /// `RecurData` from a child at a later level, held until its turn.
    pending: VecDeque<Envelope>,
    threshold: f32,
    messages_sent: u64,
    messages_received: u64,
    terminations_received: u32,
}

impl<T: Transport> RecursiveTask<T> {
    /// Binds `transport` to its section and segments the section's pixels.
    pub fn new(config: Arc<RhsegConfig>, transport: T, pixels: Vec<Pixel>) -> Result<Self, RhsegError> {
        config.validate()?;
        let tree = RecursionTree::from_config(&config)?;
        let task_id = transport.task_id();
        if !tree.contains(task_id) {
            return Err(RhsegError::Config(format!(
                "task {} outside a tree of {} tasks",
                task_id,
                tree.nb_tasks()
            )));
        }
        if let Some(identity) = config.task {
            if identity.task_id != task_id || identity.nb_tasks != tree.nb_tasks() {
                return Err(RhsegError::Config(format!(
                    "configuration is for task {} of {}, transport is task {} of {}",
                    identity.task_id,
                    identity.nb_tasks,
                    task_id,
                    tree.nb_tasks()
                )));
            }
        }
        if config.nb_sections() != tree.nb_tasks() as usize {
            return Err(RhsegError::Config(format!(
                "{} sections cannot be spread one per task over {} tasks",
                config.nb_sections(),
                tree.nb_tasks()
            )));
        }
        let layout = config.layout();
        let section = task_id * config.sections_per_task() as u32;
        let (section, regions, border) = segment_leaf(&config, section, pixels)?;

        Ok(Self {
            config,
            tree,
            layout,
            transport,
            task_id,
            state: TaskState::Segmenting,
            section,
            regions,
            border,
            children: Vec::new(),
            parent: None,
            pending: VecDeque::new(),
            threshold: 0.0,
            messages_sent: 0,
            messages_received: 0,
            terminations_received: 0,
        })
    }

    pub fn task_id(&self) -> u32 {
        self.task_id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }

    pub fn section_data(&self) -> &SectionData {
        &self.section
    }

    pub fn children(&self) -> &[ChildLink] {
        &self.children
    }

    pub fn parent_link(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.task_id == self.tree.root()
    }

    /// Runs the task to termination. Only the root returns an outcome.
    pub fn run<M: MergeDecision>(
        &mut self,
        merge: &mut M,
        options: &RunOptions,
    ) -> Result<Option<RootOutcome>, RhsegError> {
        log::info!(
            "task {}: section {} segmented into {} classes, {} objects, {} border pixels",
            self.task_id,
            self.section.section,
            self.regions.nb_class_labels(),
            self.regions.nb_object_labels(),
            self.border.len()
        );
        let mut store = match (&options.results, self.is_root()) {
            (Some(paths), true) => {
                let mut store = ResultsStore::new();
                store.open_output(&paths.class_path, &paths.object_path)?;
                store.set_buffer_sizes(
                    self.regions.layout(),
                    self.regions.nb_class_labels() as usize,
                    self.regions.nb_object_labels() as usize,
                );
                Some(store)
            }
            _ => None,
        };
        let mut level_counts = Vec::new();

        for level in 0..self.tree.last_receive_level(self.task_id) {
            self.recur_receive(level, merge)?;
            if let Some(store) = store.as_mut() {
                level_counts.push(store.write(level, &self.regions)?);
            }
        }

        match self.tree.parent(self.task_id) {
            Some((level, _)) => {
                self.recur_send_data(level)?;
                self.parallel_server(level)?;
                Ok(None)
            }
            None => self.finish_root(merge, options, store, level_counts).map(Some),
        }
    }

    pub fn report(&self) -> TaskReport {
        TaskReport {
            task_id: self.task_id,
            final_state: self.state,
            terminations_received: self.terminations_received,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            send_level: self.tree.send_level(self.task_id),
            threshold: self.threshold,
        }
    }

    //==============================================================================
    // 3. Requests and Replies
    //==============================================================================

    /// Sends one request and, unless it is `Terminate`, blocks for the reply.
    pub fn parallel_recur_request(
        &mut self,
        level: u16,
        to: u32,
        kind: RequestKind,
        value: u32,
        payload: MessageBuffer,
    ) -> Result<Option<Envelope>, RhsegError> {
        let resume = self.state;
        self.state = TaskState::Requesting;
        let request = self.envelope(kind, to, level).with_value(value).with_payload(payload);
        self.send(to, request)?;

        let reply = match kind.expected_reply() {
            Some(reply_kind) => Some(self.next_envelope(
                move |e: &Envelope| e.kind == reply_kind && e.from == to && e.level == level,
                reply_kind,
            )?),
            None => None,
        };
        self.state = resume;
        Ok(reply)
    }

    /// Sends the same request to every integrated child whose level lies in
    /// `from_level..to_level`, highest level first, and returns the replies.
    pub fn parallel_recur_requests(
        &mut self,
        kind: RequestKind,
        from_level: u16,
        to_level: u16,
        value: u32,
        payload: &MessageBuffer,
    ) -> Result<Vec<Envelope>, RhsegError> {
        let targets: Vec<ChildLink> = self
            .children_descending()
            .into_iter()
            .filter(|child| (from_level..to_level).contains(&child.level))
            .collect();
        let mut replies = Vec::with_capacity(targets.len());
        for child in targets {
            if let Some(reply) =
                self.parallel_recur_request(child.level, child.task, kind, value, payload.clone())?
            {
                replies.push(reply);
            }
        }
        Ok(replies)
    }

    fn envelope(&self, kind: RequestKind, to: u32, level: u16) -> Envelope {
        Envelope::new(kind, self.task_id, to, level, &self.layout).with_section(self.section.section)
    }

    fn send(&mut self, to: u32, envelope: Envelope) -> Result<(), RhsegError> {
        log::debug!(
            "task {} -> task {}: {} at level {}",
            self.task_id,
            to,
            envelope.kind,
            envelope.level
        );
        self.transport.send(to, envelope)?;
        self.messages_sent += 1;
        Ok(())
    }

    /// Blocks until an envelope `accept` takes arrives. `RecurData` from a
    /// child of a later level is held back; anything else is a violation.
    fn next_envelope<F, D>(&mut self, accept: F, expected: D) -> Result<Envelope, RhsegError>
    where
        F: Fn(&Envelope) -> bool,
        D: fmt::Display,
    {
        let position = self.pending.iter().position(|e| accept(e));
        let held = position.and_then(|position| self.pending.remove(position));
        let envelope = match held {
            Some(envelope) => envelope,
            None => loop {
                let envelope = self.transport.receive()?;
                self.messages_received += 1;
                log::debug!(
                    "task {} <- task {}: {} at level {}",
                    self.task_id,
                    envelope.from,
                    envelope.kind,
                    envelope.level
                );
                if accept(&envelope) {
                    break envelope;
                }
                if self.is_early_recur_data(&envelope) {
                    self.pending.push_back(envelope);
                    continue;
                }
                return Err(RhsegError::Protocol(format!(
                    "task {} ({}) expected {} but received {} from task {} at level {}",
                    self.task_id, self.state, expected, envelope.kind, envelope.from, envelope.level
                )));
            },
        };
        envelope.check_layout(&self.layout)?;
        Ok(envelope)
    }

    fn is_early_recur_data(&self, envelope: &Envelope) -> bool {
        envelope.kind == RequestKind::RecurData
            && envelope.level < self.tree.last_receive_level(self.task_id)
            && self.tree.role(self.task_id, envelope.level)
                == LevelRole::Receiver { child: envelope.from }
            && !self.children.iter().any(|c| c.level == envelope.level)
    }

    fn children_descending(&self) -> Vec<ChildLink> {
        let mut children = self.children.clone();
        children.sort_by(|a, b| b.level.cmp(&a.level));
        children
    }

    //==============================================================================
    // 4. The Data Merge
    //==============================================================================

    /// Receiver side of `level`: integrates the child's regions and border
    /// pixels, lets `merge` act, and answers with a `RecurResponse`.
    pub fn recur_receive<M: MergeDecision>(&mut self, level: u16, merge: &mut M) -> Result<(), RhsegError> {
        let LevelRole::Receiver { child } = self.tree.role(self.task_id, level) else {
            return Err(RhsegError::Internal(format!(
                "task {} is not a receiver at level {}",
                self.task_id, level
            )));
        };
        let request = self.next_envelope(
            move |e: &Envelope| e.kind == RequestKind::RecurData && e.from == child && e.level == level,
            RequestKind::RecurData,
        )?;

        self.state = TaskState::Merging;
        let mut reader = request.payload.reader();
        let (child_regions, border) = read_recur_data(&mut reader, &self.layout)?;
        reader.finish()?;
        let class_count = child_regions.nb_class_labels();
        let object_count = child_regions.nb_object_labels();
        let offsets = self.regions.append(child_regions)?;

        let seam = self
            .border
            .integrate(&self.config, border, offsets, &mut self.regions)?;
        let merges = self.apply_merge(level, merge)?;
        let boundary_pixels = self.border.recount_boundaries(&self.config, &mut self.regions)?;
        let covered: HashSet<u32> = self.tree.subtree_after(self.task_id, level).collect();
        let pruned = self.border.prune(&self.config, &covered);
        log::info!(
            "task {} level {}: integrated task {} ({} seam pairs, {} boundary pixels, {} records pruned), {} merges, {} active classes",
            self.task_id,
            level,
            child,
            seam.pairs,
            boundary_pixels,
            pruned,
            merges,
            self.regions.active_class_count()
        );

        self.children.push(ChildLink {
            task: child,
            level,
            offsets,
            class_count,
            object_count,
        });
        let response = RecurResponse {
            offsets,
            nb_class_labels: self.regions.nb_class_labels(),
            nb_object_labels: self.regions.nb_object_labels(),
            threshold: self.threshold,
        };
        self.recur_send(level, child, response)?;
        self.state = TaskState::Segmenting;
        Ok(())
    }

    /// Answers a child's `RecurData`.
    pub fn recur_send(&mut self, level: u16, child: u32, response: RecurResponse) -> Result<(), RhsegError> {
        let mut payload = MessageBuffer::with_sizes(RecurResponse::sizes());
        let mut writer = payload.writer();
        response.write(&mut writer)?;
        writer.finish()?;
        let envelope = self.envelope(RequestKind::RecurResponse, child, level).with_payload(payload);
        self.send(child, envelope)
    }

    /// Sender side of `level`: hands every region and every boundary or
    /// unresolved border pixel to the parent and records its response.
    pub fn recur_send_data(&mut self, level: u16) -> Result<(), RhsegError> {
        let LevelRole::Sender { parent } = self.tree.role(self.task_id, level) else {
            return Err(RhsegError::Internal(format!(
                "task {} is not a sender at level {}",
                self.task_id, level
            )));
        };
        let border = self.border.records();
        let regions = std::mem::replace(&mut self.regions, RegionSet::new(self.layout));
        self.border = BorderStore::default();

        let mut payload = MessageBuffer::with_sizes(recur_data_sizes(&regions, &border, &self.layout));
        let mut writer = payload.writer();
        write_recur_data(&mut writer, &regions, &border, &self.layout)?;
        writer.finish()?;
        log::info!(
            "task {} level {}: sending {} classes, {} objects, {} border pixels to task {}",
            self.task_id,
            level,
            regions.nb_class_labels(),
            regions.nb_object_labels(),
            border.len(),
            parent
        );

        let reply = self
            .parallel_recur_request(level, parent, RequestKind::RecurData, regions.nb_class_labels(), payload)?
            .ok_or_else(|| RhsegError::Internal("RecurData produced no reply".into()))?;
        let mut reader = reply.payload.reader();
        let response = RecurResponse::read(&mut reader)?;
        reader.finish()?;
        if response.offsets.class_offset.saturating_add(regions.nb_class_labels()) > response.nb_class_labels {
            return Err(RhsegError::Protocol(format!(
                "task {} placed at class offset {} past the {} labels it reports",
                parent, response.offsets.class_offset, response.nb_class_labels
            )));
        }
        self.threshold = response.threshold;
        self.parent = Some(ParentLink { parent, level, response });
        Ok(())
    }

    fn apply_merge<M: MergeDecision>(&mut self, level: u16, merge: &mut M) -> Result<usize, RhsegError> {
        let plan = merge.select_merges(level, &self.regions);
        let applied = plan.apply(&mut self.regions)?;
        self.threshold = plan.threshold;
        Ok(applied)
    }

    //==============================================================================
    // 5. Serving
    //==============================================================================

    /// Serves the parent's requests until it sends `Terminate`.
    pub fn parallel_server(&mut self, level: u16) -> Result<(), RhsegError> {
        let parent = self
            .parent
            .map(|link| link.parent)
            .ok_or_else(|| RhsegError::Internal(format!("task {} has no parent to serve", self.task_id)))?;
        self.state = TaskState::ActiveServer;
        log::info!("task {}: serving task {} from level {}", self.task_id, parent, level);

        loop {
            let request = self.next_envelope(
                move |e: &Envelope| e.from == parent && e.level == level,
                "a request from the parent",
            )?;
            match request.kind {
                RequestKind::UpdateLabels => {
                    let mut reader = request.payload.reader();
                    let maps = LabelMaps::read(&mut reader)?;
                    reader.finish()?;
                    self.broadcast_label_maps(maps)?;
                    let ack = self.envelope(RequestKind::Ack, parent, level);
                    self.send(parent, ack)?;
                }
                RequestKind::CollectLabels => {
                    let blocks = self.collect_labels()?;
                    let mut payload = MessageBuffer::with_sizes(label_blocks_sizes(&blocks));
                    let mut writer = payload.writer();
                    write_label_blocks(&mut writer, &blocks)?;
                    writer.finish()?;
                    let reply = self.envelope(RequestKind::CollectReply, parent, level).with_payload(payload);
                    self.send(parent, reply)?;
                }
                RequestKind::CollectPixels => {
                    let blocks = self.collect_pixels()?;
                    let mut payload =
                        MessageBuffer::with_sizes(pixel_blocks_sizes(&blocks, &self.layout));
                    let mut writer = payload.writer();
                    write_pixel_blocks(&mut writer, &blocks, &self.layout)?;
                    writer.finish()?;
                    let reply = self.envelope(RequestKind::CollectReply, parent, level).with_payload(payload);
                    self.send(parent, reply)?;
                }
                RequestKind::Terminate => {
                    self.terminations_received += 1;
                    self.do_termination()?;
                    self.state = TaskState::Terminated;
                    log::info!(
                        "task {}: terminated after {} messages sent, {} received",
                        self.task_id,
                        self.messages_sent,
                        self.messages_received
                    );
                    return Ok(());
                }
                other => {
                    return Err(RhsegError::Protocol(format!(
                        "task {} cannot serve {} from task {}",
                        self.task_id, other, parent
                    )));
                }
            }
            self.state = TaskState::ActiveServer;
        }
    }

    /// Sends `Terminate` to every child, highest level first. Each child
    /// relays it to its own children before exiting.
    pub fn do_termination(&mut self) -> Result<(), RhsegError> {
        let top = self.tree.last_receive_level(self.task_id);
        self.parallel_recur_requests(RequestKind::Terminate, 0, top, 0, &MessageBuffer::empty())?;
        log::debug!("task {}: termination sent to {} children", self.task_id, self.children.len());
        Ok(())
    }

    /// Applies `maps` to this task's section and relays the matching slice
    /// to every child, waiting for each acknowledgement.
    pub fn broadcast_label_maps(&mut self, maps: LabelMaps) -> Result<(), RhsegError> {
        self.section.apply_label_maps(&maps);
        for child in self.children_descending() {
            let child_maps = maps.slice_for(child.offsets, child.class_count, child.object_count)?;
            let mut payload = MessageBuffer::with_sizes(child_maps.sizes());
            let mut writer = payload.writer();
            child_maps.write(&mut writer)?;
            writer.finish()?;
            self.parallel_recur_request(child.level, child.task, RequestKind::UpdateLabels, 0, payload)?;
        }
        Ok(())
    }

    /// Final labels of every section in this task's subtree, by section.
    pub fn collect_labels(&mut self) -> Result<Vec<LabelBlock>, RhsegError> {
        let mut blocks = vec![LabelBlock {
            section: self.section.section,
            labels: self.section.final_labels()?.clone(),
        }];
        let top = self.tree.last_receive_level(self.task_id);
        for reply in
            self.parallel_recur_requests(RequestKind::CollectLabels, 0, top, 0, &MessageBuffer::empty())?
        {
            let mut reader = reply.payload.reader();
            blocks.extend(read_label_blocks(&mut reader)?);
            reader.finish()?;
        }
        blocks.sort_by_key(|b| b.section);
        Ok(blocks)
    }

    /// Pixels of every section in this task's subtree, labelled with their
    /// final class.
    pub fn collect_pixels(&mut self) -> Result<Vec<PixelBlock>, RhsegError> {
        let mut blocks = vec![PixelBlock {
            section: self.section.section,
            pixels: self.section.labelled_pixels()?,
        }];
        let top = self.tree.last_receive_level(self.task_id);
        for reply in
            self.parallel_recur_requests(RequestKind::CollectPixels, 0, top, 0, &MessageBuffer::empty())?
        {
            let mut reader = reply.payload.reader();
            blocks.extend(read_pixel_blocks(&mut reader, &self.layout)?);
            reader.finish()?;
        }
        blocks.sort_by_key(|b| b.section);
        Ok(blocks)
    }

    //==============================================================================
    // 6. Root Finish
    //==============================================================================

    fn finish_root<M: MergeDecision>(
        &mut self,
        merge: &mut M,
        options: &RunOptions,
        mut store: Option<ResultsStore>,
        mut level_counts: Vec<LevelCounts>,
    ) -> Result<RootOutcome, RhsegError> {
        let top = self.tree.top_level();
        self.state = TaskState::Merging;
        let merges = self.apply_merge(top, merge)?;
        self.border.recount_boundaries(&self.config, &mut self.regions)?;
        log::info!(
            "root: top level {} reached, {} final merges, {} classes and {} objects active",
            top,
            merges,
            self.regions.active_class_count(),
            self.regions.active_object_count()
        );
        if let Some(store) = store.as_mut() {
            level_counts.push(store.write(top, &self.regions)?);
            store.close_output()?;
        }

        self.state = TaskState::Segmenting;
        let maps = LabelMaps {
            classes: self.regions.class_label_map(),
            objects: self.regions.object_label_map(),
        };
        self.broadcast_label_maps(maps)?;

        let segmentation = if options.collect_labels {
            let blocks = self.collect_labels()?;
            Some(SegmentationMap::from_blocks(&self.config, &blocks)?)
        } else {
            None
        };
        let pixels = if options.collect_pixels {
            Some(self.collect_pixels()?)
        } else {
            None
        };

        self.do_termination()?;
        self.state = TaskState::Terminated;
        log::info!(
            "root: terminated after {} messages sent, {} received",
            self.messages_sent,
            self.messages_received
        );

        Ok(RootOutcome {
            regions: std::mem::replace(&mut self.regions, RegionSet::new(self.layout)),
            segmentation,
            pixels,
            level_counts,
            threshold: self.threshold,
        })
    }
}

/// Extracts the leaf regions of `section` and its border pixels.
fn segment_leaf(
    config: &RhsegConfig,
    section: u32,
    pixels: Vec<Pixel>,
) -> Result<(SectionData, RegionSet, BorderStore), RhsegError> {
    if pixels.len() != config.section_npixels() {
        return Err(RhsegError::Config(format!(
            "section {} given {} pixels, expected {}",
            section,
            pixels.len(),
            config.section_npixels()
        )));
    }
    let (data, regions, border) = SectionData::build(config, section, pixels)?;
    if regions.nb_class_labels() == 0 {
        log::warn!("section {} has no labeled pixels", section);
    }
    Ok((data, regions, border))
}
