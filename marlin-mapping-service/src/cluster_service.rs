// Copyright (C) 2024 Marlin, Inc.
//
// Marlin is offered under the AGPL v3.0 and as commercial software.
// For commercial licensing, contact us at hello@marlin.io.
//
// AGPL:
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use marlin_cluster_state::ClusterState;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::channel_with_priority::{self, Priority, Receiver, Sender};
use crate::{ClusterStateTaskExecutor, ClusterTasksResult, MappingUpdateError};

/// Outcome of an acknowledged cluster-state update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterStateUpdateResponse {
    /// True iff every node applied the new state within the
    /// acknowledgement timeout. The committed state stands either way.
    pub acknowledged: bool,
}

/// Scheduling parameters of one cluster-state update task.
#[derive(Clone, Copy, Debug)]
pub struct ClusterStateTaskConfig {
    /// Queue priority.
    pub priority: Priority,
    /// Bound on the time the task may spend waiting in the queue. A task
    /// whose deadline passes before its batch runs fails with
    /// [`MappingUpdateError::ProcessClusterEventTimeout`].
    pub timeout: Option<Duration>,
}

impl ClusterStateTaskConfig {
    /// Config with the given priority and no queue deadline.
    pub fn new(priority: Priority) -> Self {
        ClusterStateTaskConfig {
            priority,
            timeout: None,
        }
    }
}

/// A node-side consumer of committed cluster states.
///
/// Each applier stands for one discovery node. Acknowledgement of an update
/// requires every registered applier to apply the new state successfully.
#[async_trait]
pub trait ClusterStateApplier: Send + Sync + 'static {
    /// Applies a freshly committed state. An error counts as a
    /// non-acknowledgement; it does not roll anything back.
    async fn apply_cluster_state(&self, new_state: Arc<ClusterState>) -> anyhow::Result<()>;
}

type AckedResponse = Result<ClusterStateUpdateResponse, MappingUpdateError>;
type SharedAckFuture = Shared<BoxFuture<'static, bool>>;

/// How the submitter wants to hear back about its task.
pub struct TaskCompletion {
    inner: CompletionInner,
}

enum CompletionInner {
    FireAndForget,
    Acked {
        ack_timeout: Duration,
        sender: oneshot::Sender<AckedResponse>,
    },
}

impl TaskCompletion {
    /// No completion channel; failures are logged and that is it.
    pub fn fire_and_forget() -> Self {
        TaskCompletion {
            inner: CompletionInner::FireAndForget,
        }
    }

    /// Completion that waits for all nodes to acknowledge the committed
    /// state, for at most `ack_timeout`.
    pub fn acked(ack_timeout: Duration) -> (Self, oneshot::Receiver<AckedResponse>) {
        let (sender, receiver) = oneshot::channel();
        let completion = TaskCompletion {
            inner: CompletionInner::Acked {
                ack_timeout,
                sender,
            },
        };
        (completion, receiver)
    }

    fn fail(self, source: &'static str, error: MappingUpdateError) {
        match self.inner {
            CompletionInner::FireAndForget => {
                warn!(error = %error, "failure during [{}]", source);
            }
            CompletionInner::Acked { sender, .. } => {
                let _ = sender.send(Err(error));
            }
        }
    }

    fn succeed_unchanged(self) {
        if let CompletionInner::Acked { sender, .. } = self.inner {
            let _ = sender.send(Ok(ClusterStateUpdateResponse { acknowledged: true }));
        }
    }

    fn succeed_with_ack(self, ack_future: SharedAckFuture) {
        if let CompletionInner::Acked {
            ack_timeout,
            sender,
        } = self.inner
        {
            tokio::spawn(async move {
                let acknowledged =
                    matches!(tokio::time::timeout(ack_timeout, ack_future).await, Ok(true));
                let _ = sender.send(Ok(ClusterStateUpdateResponse { acknowledged }));
            });
        }
    }
}

struct Submission {
    source: &'static str,
    batch_key: usize,
    task: Box<dyn Any + Send>,
    runner: Arc<dyn BatchRunner>,
    deadline: Option<Instant>,
    completion: TaskCompletion,
}

trait BatchRunner: Send + Sync + 'static {
    fn execute_batch(
        &self,
        current_state: Arc<ClusterState>,
        tasks: Vec<Box<dyn Any + Send>>,
    ) -> anyhow::Result<ClusterTasksResult>;
}

struct ErasedExecutor<E: ClusterStateTaskExecutor>(Arc<E>);

impl<E: ClusterStateTaskExecutor> BatchRunner for ErasedExecutor<E> {
    fn execute_batch(
        &self,
        current_state: Arc<ClusterState>,
        tasks: Vec<Box<dyn Any + Send>>,
    ) -> anyhow::Result<ClusterTasksResult> {
        let mut typed_tasks = Vec::with_capacity(tasks.len());
        for task in tasks {
            let task = task
                .downcast::<E::Task>()
                .map_err(|_| anyhow::anyhow!("cluster state task type mismatch"))?;
            typed_tasks.push(*task);
        }
        self.0.execute(current_state, typed_tasks)
    }
}

type Appliers = Arc<RwLock<Vec<Arc<dyn ClusterStateApplier>>>>;

/// The cluster-state update queue.
///
/// A single background task owns the current `Arc<ClusterState>` and is the
/// only writer: every submitted task executes there, so two executions never
/// overlap and each batch observes all effects of earlier batches. Tasks
/// queued for the same executor are drained together and handed to it as one
/// batch.
pub struct ClusterService {
    sender: Sender<Submission>,
    state_rx: watch::Receiver<Arc<ClusterState>>,
    appliers: Appliers,
}

impl ClusterService {
    /// Spawns the state-update loop seeded with `initial_state`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(initial_state: Arc<ClusterState>) -> Self {
        let (sender, receiver) = channel_with_priority::channel();
        let (watch_tx, watch_rx) = watch::channel(initial_state.clone());
        let appliers: Appliers = Arc::new(RwLock::new(Vec::new()));
        tokio::spawn(state_update_loop(
            receiver,
            initial_state,
            watch_tx,
            appliers.clone(),
        ));
        ClusterService {
            sender,
            state_rx: watch_rx,
            appliers,
        }
    }

    /// The latest committed state.
    pub fn current_state(&self) -> Arc<ClusterState> {
        self.state_rx.borrow().clone()
    }

    /// A watcher notified on every committed state change.
    pub fn state_watcher(&self) -> watch::Receiver<Arc<ClusterState>> {
        self.state_rx.clone()
    }

    /// Registers a node applier participating in acknowledgements.
    pub fn add_applier(&self, applier: Arc<dyn ClusterStateApplier>) {
        self.appliers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(applier);
    }

    /// Enqueues a cluster-state update task.
    ///
    /// Tasks submitted with the same `executor` value may be batched into a
    /// single `execute` call, in submission order.
    pub fn submit_state_update_task<E>(
        &self,
        source: &'static str,
        task: E::Task,
        config: ClusterStateTaskConfig,
        executor: &Arc<E>,
        completion: TaskCompletion,
    ) where
        E: ClusterStateTaskExecutor,
    {
        let submission = Submission {
            source,
            batch_key: Arc::as_ptr(executor) as usize,
            task: Box::new(task),
            runner: Arc::new(ErasedExecutor(executor.clone())),
            deadline: config.timeout.map(|timeout| Instant::now() + timeout),
            completion,
        };
        if self.sender.send(submission, config.priority).is_err() {
            // The loop is gone; the completion channel was dropped with the
            // submission and the caller will observe that.
            warn!("cluster state update loop is not running, dropping task [{}]", source);
        }
    }
}

async fn state_update_loop(
    mut receiver: Receiver<Submission>,
    initial_state: Arc<ClusterState>,
    watch_tx: watch::Sender<Arc<ClusterState>>,
    appliers: Appliers,
) {
    let mut current_state = initial_state;
    while let Some(first_submission) = receiver.recv().await {
        let mut submissions = vec![first_submission];
        submissions.extend(receiver.drain());
        for batch in group_into_batches(submissions) {
            current_state = execute_batch(current_state, batch, &watch_tx, &appliers).await;
        }
    }
    debug!("cluster state update loop stopped");
}

/// Groups submissions by executor, preserving first-seen order across groups
/// and submission order within each group.
fn group_into_batches(submissions: Vec<Submission>) -> Vec<Vec<Submission>> {
    let mut batches: Vec<(usize, Vec<Submission>)> = Vec::new();
    for submission in submissions {
        match batches
            .iter_mut()
            .find(|(batch_key, _)| *batch_key == submission.batch_key)
        {
            Some((_, batch)) => batch.push(submission),
            None => batches.push((submission.batch_key, vec![submission])),
        }
    }
    batches.into_iter().map(|(_, batch)| batch).collect()
}

async fn execute_batch(
    current_state: Arc<ClusterState>,
    batch: Vec<Submission>,
    watch_tx: &watch::Sender<Arc<ClusterState>>,
    appliers: &Appliers,
) -> Arc<ClusterState> {
    let now = Instant::now();
    let mut live_submissions = Vec::with_capacity(batch.len());
    for submission in batch {
        if submission.deadline.map_or(false, |deadline| deadline < now) {
            let source = submission.source;
            submission.completion.fail(
                source,
                MappingUpdateError::ProcessClusterEventTimeout { queue: source },
            );
            continue;
        }
        live_submissions.push(submission);
    }
    let Some(first_submission) = live_submissions.first() else {
        return current_state;
    };
    let source = first_submission.source;
    let runner = first_submission.runner.clone();

    let mut tasks = Vec::with_capacity(live_submissions.len());
    let mut completions = Vec::with_capacity(live_submissions.len());
    for submission in live_submissions {
        tasks.push(submission.task);
        completions.push(submission.completion);
    }

    let result = match runner.execute_batch(current_state.clone(), tasks) {
        Ok(result) => result,
        Err(error) => {
            warn!(error = %error, "cluster state update [{}] failed", source);
            for completion in completions {
                completion.fail(
                    source,
                    MappingUpdateError::Internal {
                        message: format!("failed to execute cluster state update [{source}]"),
                        cause: anyhow::anyhow!("{error}"),
                    },
                );
            }
            return current_state;
        }
    };

    let changed = !Arc::ptr_eq(&result.new_state, &current_state);
    let ack_future = if changed {
        watch_tx.send_replace(result.new_state.clone());
        debug!(version = result.new_state.version(), "published new cluster state");
        Some(spawn_state_application(result.new_state.clone(), appliers))
    } else {
        None
    };

    let mut outcomes = result.outcomes.into_iter();
    for completion in completions {
        match outcomes.next() {
            Some(Err(task_error)) => completion.fail(source, task_error),
            Some(Ok(())) => match &ack_future {
                Some(ack_future) => completion.succeed_with_ack(ack_future.clone()),
                None => completion.succeed_unchanged(),
            },
            None => completion.fail(
                source,
                MappingUpdateError::Internal {
                    message: format!("executor of [{source}] reported too few task outcomes"),
                    cause: anyhow::anyhow!("task outcome missing"),
                },
            ),
        }
    }
    result.new_state
}

/// Fans the committed state out to every applier. The returned future
/// resolves to true iff all of them applied it successfully.
fn spawn_state_application(new_state: Arc<ClusterState>, appliers: &Appliers) -> SharedAckFuture {
    let appliers_snapshot: Vec<Arc<dyn ClusterStateApplier>> = appliers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let ack_future = async move {
        let apply_results = join_all(appliers_snapshot.into_iter().map(|applier| {
            let state = new_state.clone();
            async move {
                let apply_result = applier.apply_cluster_state(state).await;
                if let Err(error) = &apply_result {
                    warn!(error = %error, "node failed to apply cluster state");
                }
                apply_result.is_ok()
            }
        }))
        .await;
        apply_results.into_iter().all(|applied| applied)
    }
    .boxed()
    .shared();
    // Drive the application even if every waiter gives up before it is done.
    tokio::spawn(ack_future.clone());
    ack_future
}

#[cfg(test)]
mod tests {
    use marlin_cluster_state::{IndexMetadata, Metadata};

    use super::*;

    struct AddIndexExecutor;

    impl ClusterStateTaskExecutor for AddIndexExecutor {
        type Task = String;

        fn execute(
            &self,
            current_state: Arc<ClusterState>,
            tasks: Vec<String>,
        ) -> anyhow::Result<ClusterTasksResult> {
            let mut metadata_builder = Metadata::builder_from(current_state.metadata());
            for index_name in &tasks {
                metadata_builder.put_index_metadata(IndexMetadata::for_test(
                    index_name,
                    &format!("uuid-{index_name}"),
                ));
            }
            let new_state = ClusterState::builder(&current_state)
                .metadata(metadata_builder.build())
                .build();
            Ok(ClusterTasksResult {
                new_state,
                outcomes: tasks.iter().map(|_| Ok(())).collect(),
            })
        }
    }

    struct NoopExecutor;

    impl ClusterStateTaskExecutor for NoopExecutor {
        type Task = ();

        fn execute(
            &self,
            current_state: Arc<ClusterState>,
            tasks: Vec<()>,
        ) -> anyhow::Result<ClusterTasksResult> {
            Ok(ClusterTasksResult {
                new_state: current_state,
                outcomes: tasks.iter().map(|_| Ok(())).collect(),
            })
        }
    }

    struct FailingExecutor;

    impl ClusterStateTaskExecutor for FailingExecutor {
        type Task = ();

        fn execute(
            &self,
            _current_state: Arc<ClusterState>,
            _tasks: Vec<()>,
        ) -> anyhow::Result<ClusterTasksResult> {
            anyhow::bail!("the state builder blew up")
        }
    }

    struct SlowApplier(Duration);

    #[async_trait]
    impl ClusterStateApplier for SlowApplier {
        async fn apply_cluster_state(&self, _new_state: Arc<ClusterState>) -> anyhow::Result<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    struct FailingApplier;

    #[async_trait]
    impl ClusterStateApplier for FailingApplier {
        async fn apply_cluster_state(&self, _new_state: Arc<ClusterState>) -> anyhow::Result<()> {
            anyhow::bail!("node went away")
        }
    }

    fn acked_config() -> ClusterStateTaskConfig {
        ClusterStateTaskConfig::new(Priority::High)
    }

    #[tokio::test]
    async fn test_submitted_task_commits_and_acks() -> anyhow::Result<()> {
        let cluster_service = ClusterService::start(ClusterState::empty());
        let executor = Arc::new(AddIndexExecutor);
        let (completion, response_rx) = TaskCompletion::acked(Duration::from_secs(5));
        cluster_service.submit_state_update_task(
            "add-index",
            "t1".to_string(),
            acked_config(),
            &executor,
            completion,
        );
        let response = response_rx.await??;
        assert!(response.acknowledged);
        assert!(cluster_service.current_state().metadata().index("t1").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_later_batches_observe_earlier_effects() -> anyhow::Result<()> {
        let cluster_service = ClusterService::start(ClusterState::empty());
        let executor = Arc::new(AddIndexExecutor);
        for index_name in ["t1", "t2", "t3"] {
            let (completion, response_rx) = TaskCompletion::acked(Duration::from_secs(5));
            cluster_service.submit_state_update_task(
                "add-index",
                index_name.to_string(),
                acked_config(),
                &executor,
                completion,
            );
            response_rx.await??;
        }
        let state = cluster_service.current_state();
        for index_name in ["t1", "t2", "t3"] {
            assert!(state.metadata().index(index_name).is_some());
        }
        // Three committed revisions on top of the initial one.
        assert_eq!(state.version(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_state_acks_immediately() -> anyhow::Result<()> {
        let cluster_service = ClusterService::start(ClusterState::empty());
        // A slow applier would stall acknowledgement if a state were published.
        cluster_service.add_applier(Arc::new(SlowApplier(Duration::from_secs(30))));
        let executor = Arc::new(NoopExecutor);
        let (completion, response_rx) = TaskCompletion::acked(Duration::from_millis(100));
        cluster_service.submit_state_update_task("noop", (), acked_config(), &executor, completion);
        let response = response_rx.await??;
        assert!(response.acknowledged);
        Ok(())
    }

    #[tokio::test]
    async fn test_executor_failure_fails_every_task() -> anyhow::Result<()> {
        let cluster_service = ClusterService::start(ClusterState::empty());
        let executor = Arc::new(FailingExecutor);
        let (completion, response_rx) = TaskCompletion::acked(Duration::from_secs(5));
        cluster_service.submit_state_update_task("boom", (), acked_config(), &executor, completion);
        let error = response_rx.await?.unwrap_err();
        assert!(matches!(error, MappingUpdateError::Internal { .. }));
        // The state was left untouched.
        assert_eq!(cluster_service.current_state().version(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_slow_applier_times_out_the_ack() -> anyhow::Result<()> {
        let cluster_service = ClusterService::start(ClusterState::empty());
        cluster_service.add_applier(Arc::new(SlowApplier(Duration::from_secs(30))));
        let executor = Arc::new(AddIndexExecutor);
        let (completion, response_rx) = TaskCompletion::acked(Duration::from_millis(50));
        cluster_service.submit_state_update_task(
            "add-index",
            "t1".to_string(),
            acked_config(),
            &executor,
            completion,
        );
        let response = response_rx.await??;
        assert!(!response.acknowledged);
        // The commit stands even though acknowledgement timed out.
        assert!(cluster_service.current_state().metadata().index("t1").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_applier_is_a_non_ack() -> anyhow::Result<()> {
        let cluster_service = ClusterService::start(ClusterState::empty());
        cluster_service.add_applier(Arc::new(FailingApplier));
        let executor = Arc::new(AddIndexExecutor);
        let (completion, response_rx) = TaskCompletion::acked(Duration::from_secs(5));
        cluster_service.submit_state_update_task(
            "add-index",
            "t1".to_string(),
            acked_config(),
            &executor,
            completion,
        );
        let response = response_rx.await??;
        assert!(!response.acknowledged);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_queue_deadline_fails_the_task() -> anyhow::Result<()> {
        let cluster_service = ClusterService::start(ClusterState::empty());
        let slow_executor = Arc::new(SleepyExecutor(Duration::from_millis(50)));
        let executor = Arc::new(AddIndexExecutor);
        cluster_service.submit_state_update_task(
            "sleep",
            (),
            acked_config(),
            &slow_executor,
            TaskCompletion::fire_and_forget(),
        );
        let (completion, response_rx) = TaskCompletion::acked(Duration::from_secs(5));
        let config = ClusterStateTaskConfig {
            priority: Priority::High,
            timeout: Some(Duration::from_millis(1)),
        };
        cluster_service.submit_state_update_task(
            "add-index",
            "t1".to_string(),
            config,
            &executor,
            completion,
        );
        let error = response_rx.await?.unwrap_err();
        assert!(matches!(
            error,
            MappingUpdateError::ProcessClusterEventTimeout { .. }
        ));
        Ok(())
    }

    struct SleepyExecutor(Duration);

    impl ClusterStateTaskExecutor for SleepyExecutor {
        type Task = ();

        fn execute(
            &self,
            current_state: Arc<ClusterState>,
            tasks: Vec<()>,
        ) -> anyhow::Result<ClusterTasksResult> {
            std::thread::sleep(self.0);
            Ok(ClusterTasksResult {
                new_state: current_state,
                outcomes: tasks.iter().map(|_| Ok(())).collect(),
            })
        }
    }
}
