//! Runs a whole recursion tree inside one process: one scoped thread per
//! task, connected by a `ChannelNetwork`.

use std::sync::Arc;
use std::thread;

use crate::config::RhsegConfig;
use crate::error::RhsegError;
use crate::protocol::merge::MergeDecision;
use crate::protocol::task::{RecursiveTask, RootOutcome, RunOptions, TaskReport};
use crate::protocol::transport::ChannelNetwork;
use crate::protocol::tree::RecursionTree;
use crate::records::pixel::Pixel;

type TaskResult = Result<(TaskReport, Option<RootOutcome>), RhsegError>;

#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub root: RootOutcome,
    /// One report per task, ordered by task id.
    pub reports: Vec<TaskReport>,
}

/// Segments `sections` (one pixel vector per section, in section order) over
/// a full tree of in-process tasks. `merge_factory` builds the merge decision
/// each task uses, given its task id.
pub fn run_local_cluster<M, F>(
    config: Arc<RhsegConfig>,
    sections: Vec<Vec<Pixel>>,
    merge_factory: F,
    options: &RunOptions,
) -> Result<ClusterOutcome, RhsegError>
where
    M: MergeDecision,
    F: Fn(u32) -> M + Sync,
{
    config.validate()?;
    let tree = RecursionTree::from_config(&config)?;
    if sections.len() != tree.nb_tasks() as usize {
        return Err(RhsegError::Config(format!(
            "{} sections given for {} tasks",
            sections.len(),
            tree.nb_tasks()
        )));
    }
    log::info!(
        "starting {} tasks over {} levels",
        tree.nb_tasks(),
        config.onb_levels
    );

    // Every task is built, and its section checked and segmented, before any
    // thread starts.
    let tasks = ChannelNetwork::endpoints(tree.nb_tasks() as usize)
        .into_iter()
        .zip(sections)
        .map(|(transport, pixels)| RecursiveTask::new(Arc::clone(&config), transport, pixels))
        .collect::<Result<Vec<_>, RhsegError>>()?;

    let factory = &merge_factory;
    let results: Vec<TaskResult> = thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|mut task| {
                scope.spawn(move || -> TaskResult {
                    let mut merge = factory(task.task_id());
                    let outcome = task.run(&mut merge, options)?;
                    Ok((task.report(), outcome))
                })
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(task_id, handle)| {
                handle.join().unwrap_or_else(|_| {
                    Err(RhsegError::Internal(format!("task {} panicked", task_id)))
                })
            })
            .collect()
    });

    let mut reports = Vec::with_capacity(results.len());
    let mut root = None;
    for result in results {
        let (report, outcome) = result?;
        reports.push(report);
        if outcome.is_some() {
            root = outcome;
        }
    }
    let root = root.ok_or_else(|| RhsegError::Internal("the root returned no outcome".into()))?;
    Ok(ClusterOutcome { root, reports })
}
