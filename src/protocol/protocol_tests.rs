use std::sync::Arc;
use std::thread;

use crate::buffer::MessageBuffer;
use crate::config::{Dimensionality, FeatureFlags, RhsegConfig};
use crate::error::RhsegError;
use crate::protocol::local::run_local_cluster;
use crate::protocol::merge::{MergeDecision, MergePlan, NoMerge};
use crate::protocol::request::{Envelope, RequestKind};
use crate::protocol::section_data::{recur_data_sizes, write_recur_data, RecurResponse, SectionData};
use crate::protocol::task::{RecursiveTask, RootOutcome, RunOptions, TaskReport, TaskState};
use crate::protocol::transport::{ChannelNetwork, ChannelTransport, Transport};
use crate::records::layout::RecordLayout;
use crate::records::pixel::Pixel;
use crate::region::{LabelOffsets, RegionSet};
use crate::results::{ResultsPaths, ResultsReader};
use crate::spatial::Coord;

// Test Helpers

/// Every pixel of `section` pre-labelled `label`, with band values that
/// differ per pixel.
fn section_pixels(config: &RhsegConfig, section: u32, label: u32) -> Vec<Pixel> {
    let layout = config.layout();
    (0..config.section_npixels())
        .map(|i| {
            let values = (0..layout.nbands)
                .map(|band| (section * 100 + i as u32 + band as u32) as f32)
                .collect();
            Pixel::new(values, &layout).with_label(label)
        })
        .collect()
}

/// One distinct pre-label per section.
fn distinct_sections(config: &RhsegConfig) -> Vec<Vec<Pixel>> {
    (0..config.nb_sections() as u32)
        .map(|s| section_pixels(config, s, s + 1))
        .collect()
}

fn one_d(ncols: u32, onb_levels: u16) -> Arc<RhsegConfig> {
    Arc::new(
        RhsegConfig::uniform_split(
            Dimensionality::One,
            (ncols, 1, 1),
            1,
            onb_levels,
            FeatureFlags::default(),
        )
        .unwrap(),
    )
}

/// 4x4 single-band image split into two 4x2 sections.
fn four_by_four() -> Arc<RhsegConfig> {
    Arc::new(
        RhsegConfig::uniform_split(Dimensionality::Two, (4, 4, 1), 1, 2, FeatureFlags::default())
            .unwrap(),
    )
}

/// Merges every active class into the lowest-numbered one.
struct MergeEverything;

impl MergeDecision for MergeEverything {
    fn select_merges(&mut self, level: u16, regions: &RegionSet) -> MergePlan {
        let active: Vec<u32> = regions.classes().iter_active().map(|c| c.label).collect();
        MergePlan {
            class_merges: active.iter().skip(1).map(|&c| (c, active[0])).collect(),
            threshold: f32::from(level),
        }
    }
}

fn recur_data(config: &RhsegConfig, from: u32, level: u16, label: u32) -> Envelope {
    let layout = config.layout();
    let (_, regions, border) =
        SectionData::build(config, from, section_pixels(config, from, label)).unwrap();
    let records = border.records();
    let mut payload = MessageBuffer::with_sizes(recur_data_sizes(&regions, &records, &layout));
    let mut w = payload.writer();
    write_recur_data(&mut w, &regions, &records, &layout).unwrap();
    w.finish().unwrap();
    Envelope::new(RequestKind::RecurData, from, 0, level, &layout).with_payload(payload)
}

type RootRun = Result<(Option<RootOutcome>, TaskReport), RhsegError>;

fn spawn_task(
    config: Arc<RhsegConfig>,
    transport: ChannelTransport,
    pixels: Vec<Pixel>,
) -> thread::JoinHandle<RootRun> {
    thread::spawn(move || -> RootRun {
        let mut task = RecursiveTask::new(config, transport, pixels)?;
        let outcome = task.run(&mut NoMerge, &RunOptions::default())?;
        Ok((outcome, task.report()))
    })
}

// Cluster runs

#[test]
fn test_termination_reaches_every_server_exactly_once() {
    let config = one_d(16, 4);
    let outcome = run_local_cluster(
        Arc::clone(&config),
        distinct_sections(&config),
        |_| NoMerge,
        &RunOptions::default(),
    )
    .unwrap();

    assert_eq!(outcome.reports.len(), 8);
    for report in &outcome.reports {
        assert_eq!(report.final_state, TaskState::Terminated);
        let expected = if report.task_id == 0 { 0 } else { 1 };
        assert_eq!(report.terminations_received, expected, "task {}", report.task_id);
    }
    // Task 4 sends once, integrates two children, and serves one broadcast
    // and one termination.
    let task4 = &outcome.reports[4];
    assert_eq!(task4.send_level, Some(2));
    assert_eq!(task4.messages_sent, 2 + 1 + 2 + 2 + 1);
    assert_eq!(outcome.root.regions.active_class_count(), 8);
}

#[test]
fn test_boundary_counts_span_every_seam_of_a_deep_tree() {
    let config = one_d(16, 4);
    let outcome = run_local_cluster(
        Arc::clone(&config),
        distinct_sections(&config),
        |_| NoMerge,
        &RunOptions::default(),
    )
    .unwrap();
    let nbpix: Vec<u32> = outcome
        .root
        .regions
        .classes()
        .iter_active()
        .map(|c| c.stats.nbpix)
        .collect();
    assert_eq!(nbpix, vec![1, 2, 2, 2, 2, 2, 2, 1]);

    let merged = run_local_cluster(
        Arc::clone(&config),
        distinct_sections(&config),
        |_| MergeEverything,
        &RunOptions::default(),
    )
    .unwrap();
    let regions = merged.root.regions;
    assert_eq!(regions.active_class_count(), 1);
    assert!(regions.classes().iter_active().all(|c| c.stats.nbpix == 0 && c.stats.npix == 16));
    assert!(regions.objects().iter_active().all(|o| o.stats.nbpix == 0));
}

#[test]
fn test_two_section_image_has_two_adjacent_classes() {
    let config = four_by_four();
    let sections = vec![section_pixels(&config, 0, 1), section_pixels(&config, 1, 2)];
    let options = RunOptions {
        collect_labels: true,
        collect_pixels: true,
        results: None,
    };
    let outcome = run_local_cluster(Arc::clone(&config), sections, |_| NoMerge, &options).unwrap();
    let root = outcome.root;

    assert_eq!(root.regions.active_class_count(), 2);
    assert!(root.regions.class(1).unwrap().neighbor_classes.contains(&2));
    assert!(root.regions.class(2).unwrap().neighbor_classes.contains(&1));
    root.regions.check_neighbor_symmetry().unwrap();
    // One row on each side of the seam.
    assert_eq!(root.regions.object(1).unwrap().stats.nbpix, 4);
    assert_eq!(root.regions.object(2).unwrap().stats.nbpix, 4);
    assert_eq!(root.regions.class(2).unwrap().stats.npix, 8);

    let map = root.segmentation.unwrap();
    assert_eq!(map.nb_classes(), 2);
    assert!(map.classes_adjacent(1, 2));
    assert_eq!(map.class_at(Coord::new(3, 1, 0)), Some(1));
    assert_eq!(map.class_at(Coord::new(0, 2, 0)), Some(2));
    assert_eq!(map.object_at(Coord::new(0, 3, 0)), Some(2));
    assert_eq!(map.boundary_map().count_ones(), 8);

    let pixels = root.pixels.unwrap();
    assert_eq!(pixels.len(), 2);
    assert!(pixels[1].pixels.iter().all(|p| p.region_label == 2));
    assert_eq!(pixels[1].pixels[0].values, vec![100.0]);
}

#[test]
fn test_merge_decision_unifies_the_seam() {
    let config = four_by_four();
    let options = RunOptions {
        collect_labels: true,
        ..RunOptions::default()
    };
    let outcome =
        run_local_cluster(Arc::clone(&config), distinct_sections(&config), |_| MergeEverything, &options)
            .unwrap();
    let root = outcome.root;

    assert_eq!(root.regions.active_class_count(), 1);
    assert_eq!(root.regions.active_object_count(), 1);
    assert_eq!(root.regions.class(1).unwrap().stats.npix, 16);
    // One region covers the image, so nothing lies on a boundary.
    assert_eq!(root.regions.class(1).unwrap().stats.nbpix, 0);
    let object = root.regions.objects().iter_active().next().unwrap();
    assert_eq!(object.stats.npix, 16);
    assert_eq!(object.stats.nbpix, 0);
    assert_eq!(root.threshold, 1.0);
    assert_eq!(outcome.reports[1].threshold, 0.0);

    let map = root.segmentation.unwrap();
    assert!(map.class_labels.iter().all(|&c| c == 1));
    let object = map.object_labels[0];
    assert!(map.object_labels.iter().all(|&o| o == object));
    assert_eq!(map.boundary_map().count_ones(), 0);
}

#[test]
fn test_root_writes_one_results_level_per_merge_step() {
    let config = one_d(16, 4);
    let dir = std::env::temp_dir().join(format!("rhseg-cluster-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let paths = ResultsPaths {
        class_path: dir.join("class.bin"),
        object_path: dir.join("object.bin"),
    };
    let options = RunOptions {
        results: Some(paths.clone()),
        ..RunOptions::default()
    };
    let outcome =
        run_local_cluster(Arc::clone(&config), distinct_sections(&config), |_| NoMerge, &options)
            .unwrap();

    let counts = outcome.root.level_counts.clone();
    let classes: Vec<u32> = counts.iter().map(|c| c.nb_classes).collect();
    assert_eq!(classes, vec![2, 4, 8, 8]);

    let mut reader = ResultsReader::new(
        std::fs::File::open(&paths.class_path).unwrap(),
        std::fs::File::open(&paths.object_path).unwrap(),
    );
    let layout = config.layout();
    let mut last = None;
    for c in &counts {
        let level = reader.read(c.level, *c, &layout).unwrap();
        assert_eq!(level.classes.len(), c.nb_classes as usize);
        assert!(level.classes.iter().all(|class| class.stats.npix == 2));
        last = Some(level);
    }
    let top = last.unwrap();
    let nbpix: Vec<u32> = top.classes.iter().map(|class| class.stats.nbpix).collect();
    assert_eq!(nbpix, vec![1, 2, 2, 2, 2, 2, 2, 1]);
    assert_eq!(top.classes, outcome.root.regions.classes().iter_active().cloned().collect::<Vec<_>>());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_single_level_tree_runs_alone() {
    let config = one_d(4, 1);
    let outcome = run_local_cluster(
        Arc::clone(&config),
        vec![section_pixels(&config, 0, 3)],
        |_| NoMerge,
        &RunOptions {
            collect_labels: true,
            ..RunOptions::default()
        },
    )
    .unwrap();
    assert_eq!(outcome.reports[0].messages_sent, 0);
    assert_eq!(outcome.root.segmentation.unwrap().class_labels, vec![1; 4]);
}

#[test]
fn test_section_count_must_match_task_count() {
    let config = four_by_four();
    let result = run_local_cluster(
        Arc::clone(&config),
        vec![section_pixels(&config, 0, 1)],
        |_| NoMerge,
        &RunOptions::default(),
    );
    assert!(matches!(result, Err(RhsegError::Config(_))));
}

#[test]
fn test_one_malformed_section_fails_the_cluster_without_running_it() {
    let config = one_d(16, 4);
    let mut sections = distinct_sections(&config);
    sections[7].pop();
    let result = run_local_cluster(Arc::clone(&config), sections, |_| NoMerge, &RunOptions::default());
    assert!(matches!(result, Err(RhsegError::Config(_))));
}

#[test]
fn test_task_identity_must_match_its_transport() {
    let config = four_by_four();
    let mut endpoints = ChannelNetwork::endpoints(2);
    let bound = Arc::new(config.for_task(1));
    let result = RecursiveTask::new(bound, endpoints.remove(0), section_pixels(&config, 0, 1));
    assert!(matches!(result, Err(RhsegError::Config(_))));

    let bound = Arc::new(config.for_task(0));
    let transport = ChannelNetwork::endpoints(2).remove(0);
    assert!(RecursiveTask::new(bound, transport, section_pixels(&config, 0, 1)).is_ok());
}

// Scripted peers

#[test]
fn test_root_holds_back_early_recur_data() {
    let config = one_d(8, 3);
    let layout = config.layout();
    let mut endpoints = ChannelNetwork::endpoints(4);
    let mut ep2 = endpoints.remove(2);
    let mut ep1 = endpoints.remove(1);
    let root = spawn_task(Arc::clone(&config), endpoints.remove(0), section_pixels(&config, 0, 1));

    // Level 1 arrives before level 0.
    ep2.send(0, recur_data(&config, 2, 1, 3)).unwrap();
    ep1.send(0, recur_data(&config, 1, 0, 2)).unwrap();

    let first = ep1.receive().unwrap();
    assert_eq!(first.kind, RequestKind::RecurResponse);
    let response = RecurResponse::read(&mut first.payload.reader()).unwrap();
    assert_eq!(response.offsets, LabelOffsets { class_offset: 1, object_offset: 1 });

    let second = ep2.receive().unwrap();
    let response = RecurResponse::read(&mut second.payload.reader()).unwrap();
    assert_eq!(response.offsets, LabelOffsets { class_offset: 2, object_offset: 2 });
    assert_eq!(response.nb_class_labels, 3);

    for (ep, from, level) in [(&mut ep2, 2, 1), (&mut ep1, 1, 0)] {
        let update = ep.receive().unwrap();
        assert_eq!(update.kind, RequestKind::UpdateLabels);
        ep.send(0, Envelope::new(RequestKind::Ack, from, 0, level, &layout)).unwrap();
    }
    assert_eq!(ep2.receive().unwrap().kind, RequestKind::Terminate);
    assert_eq!(ep1.receive().unwrap().kind, RequestKind::Terminate);

    let (outcome, report) = root.join().unwrap().unwrap();
    assert_eq!(outcome.unwrap().regions.active_class_count(), 3);
    assert_eq!(report.messages_received, 4);
    assert_eq!(report.messages_sent, 6);
}

#[test]
fn test_collect_before_label_update_is_a_protocol_error() {
    let config = four_by_four();
    let layout = config.layout();
    let mut endpoints = ChannelNetwork::endpoints(2);
    let server = spawn_task(Arc::clone(&config), endpoints.remove(1), section_pixels(&config, 1, 2));
    let mut parent = endpoints.remove(0);

    let data = parent.receive().unwrap();
    assert_eq!(data.kind, RequestKind::RecurData);
    let response = RecurResponse {
        offsets: LabelOffsets { class_offset: 1, object_offset: 1 },
        nb_class_labels: 2,
        nb_object_labels: 2,
        threshold: 0.0,
    };
    let mut payload = MessageBuffer::with_sizes(RecurResponse::sizes());
    let mut w = payload.writer();
    response.write(&mut w).unwrap();
    w.finish().unwrap();
    parent
        .send(1, Envelope::new(RequestKind::RecurResponse, 0, 1, 0, &layout).with_payload(payload))
        .unwrap();
    parent
        .send(1, Envelope::new(RequestKind::CollectLabels, 0, 1, 0, &layout))
        .unwrap();

    assert!(matches!(server.join().unwrap(), Err(RhsegError::Protocol(_))));
}

#[test]
fn test_receiver_rejects_foreign_layout_and_stray_messages() {
    let config = four_by_four();
    let other_layout = RecordLayout::new(
        Dimensionality::Two,
        1,
        FeatureFlags { edge_image: true, local_std_dev: false },
    );

    let mut endpoints = ChannelNetwork::endpoints(2);
    let mut child = endpoints.remove(1);
    let root = spawn_task(Arc::clone(&config), endpoints.remove(0), section_pixels(&config, 0, 1));
    child
        .send(0, Envelope::new(RequestKind::RecurData, 1, 0, 0, &other_layout))
        .unwrap();
    assert!(matches!(root.join().unwrap(), Err(RhsegError::LayoutMismatch { .. })));

    let mut endpoints = ChannelNetwork::endpoints(2);
    let mut child = endpoints.remove(1);
    let root = spawn_task(Arc::clone(&config), endpoints.remove(0), section_pixels(&config, 0, 1));
    child
        .send(0, Envelope::new(RequestKind::Ack, 1, 0, 0, &config.layout()))
        .unwrap();
    assert!(matches!(root.join().unwrap(), Err(RhsegError::Protocol(_))));
}
