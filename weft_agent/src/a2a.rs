use crate::host::{HandlerContext, OutboundReply, Respond};
use crate::protocol::{
    topics, AgentCard, AgentTaskCancelRequest, AgentTaskError, AgentTaskRequest, AgentTaskResult,
    AgentTaskStatusUpdate, TaskState, WireMessage,
};
use crate::{ErrorCode, HandlerFault};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use weft_bus::{Envelope, Publish, PublishError, Topic};
use weft_sync::{Gate, Latch};

/// Publishes the given [`AgentCard`] on the discovery topic, announcing the
/// agent's availability and skills.
pub async fn announce(
    publisher: &Arc<dyn Publish>,
    card: &AgentCard,
) -> Result<(), PublishError> {
    publish_card(publisher, card).await?;

    info!(agent = card.name.as_str(), "Announced the agent card");

    Ok(())
}

/// Re-publishes the given card with the deregistration flag raised, so that
/// directories evict it. Part of a graceful stop.
pub async fn deregister(
    publisher: &Arc<dyn Publish>,
    card: &AgentCard,
) -> Result<(), PublishError> {
    let mut departing = card.clone();
    departing.is_deregistering = true;

    publish_card(publisher, &departing).await?;

    info!(agent = card.name.as_str(), "Deregistered the agent card");

    Ok(())
}

async fn publish_card(publisher: &Arc<dyn Publish>, card: &AgentCard) -> Result<(), PublishError> {
    let envelope = Envelope::builder()
        .with_payload(AgentCard::MESSAGE_TYPE, card)
        .map_err(|error| PublishError::Transport(error.to_string()))?
        .with_source(card.name.as_str())
        .build()
        .map_err(|error| PublishError::Transport(error.to_string()))?;

    let topic = Topic::parse(topics::DISCOVERY_ANNOUNCE)
        .expect("reserved topic literals are syntactically valid");

    publisher.publish(&topic, envelope).await
}

/// The sink a [`SkillExecutor`] streams status updates into. Every update
/// lands on the task's reply topic with the request's correlation id, so the
/// submitter's correlation proxy can surface it as progress.
pub struct TaskUpdates {
    publisher: Arc<dyn Publish>,
    reply_to: Option<Topic>,
    correlation_id: Option<Arc<str>>,
    task_id: Arc<str>,
    source: Arc<str>,
}

impl TaskUpdates {
    /// Appends a [`Working`](TaskState::Working) status update, with an
    /// optional progress note. Failures to publish an update are logged and
    /// swallowed: progress is best effort, the terminal reply is not.
    pub async fn working(&self, message: Option<&str>) {
        self.transition(TaskState::Working, message).await;
    }

    /// Appends a status update for the given state transition.
    pub async fn transition(&self, state: TaskState, message: Option<&str>) {
        let Some(reply_to) = &self.reply_to else {
            return;
        };

        let update = AgentTaskStatusUpdate {
            task_id: self.task_id.to_string(),
            state,
            message: message.map(str::to_string),
        };

        let mut builder = match Envelope::builder()
            .with_payload(AgentTaskStatusUpdate::MESSAGE_TYPE, &update)
        {
            Ok(builder) => builder.with_source(self.source.as_ref()),
            Err(error) => {
                warn!(
                    task_id = self.task_id.as_ref(),
                    error_message = %error,
                    "Failed to encode a task status update",
                );
                return;
            }
        };
        if let Some(correlation_id) = &self.correlation_id {
            builder = builder.with_correlation_id(correlation_id.as_ref());
        }

        let Ok(envelope) = builder.build() else {
            // Unreachable in practice: type and source are always set above
            return;
        };

        if let Err(error) = self.publisher.publish(reply_to, envelope).await {
            warn!(
                task_id = self.task_id.as_ref(),
                state = %state,
                error_message = %error,
                "Failed to publish a task status update",
            );
        }
    }
}

/// How a finished task concludes: one of the three terminal states plus the
/// outgoing message.
pub struct TaskConclusion {
    state: TaskState,
    message: String,
}

impl TaskConclusion {
    /// The task finished successfully with the given output.
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            state: TaskState::Completed,
            message: message.into(),
        }
    }

    /// The task was cancelled before completion.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            state: TaskState::Cancelled,
            message: message.into(),
        }
    }

    /// The task ran but failed.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failed,
            message: message.into(),
        }
    }
}

/// Performs the work behind one advertised skill.
#[async_trait]
pub trait SkillExecutor: Send + Sync {
    /// Runs the task, optionally streaming progress through `updates`, and
    /// concludes with a terminal state.
    ///
    /// The `cancel` token is specific to this task: it fires on an explicit
    /// [`AgentTaskCancelRequest`] as well as on host shutdown. An executor
    /// observing it should stop and return a
    /// [cancelled](TaskConclusion::cancelled) conclusion; when the firing
    /// was a host shutdown, the worker discards the conclusion and
    /// propagates the cancellation as a fault instead. Other faults are
    /// classified into an [`AgentTaskError`] reply.
    async fn run(
        &self,
        request: &AgentTaskRequest,
        updates: &TaskUpdates,
        cancel: &CancellationToken,
    ) -> Result<TaskConclusion, HandlerFault>;
}

/// The invocation-style handler behind `agent.task.<name>` topics: routes a
/// task request to the executor of its skill and drives the
/// submitted → working → terminal lifecycle, streaming a status update for
/// every transition.
///
/// Every accepted task is tracked by id, which backs the companion
/// [`AgentTaskCancelRequest`] handler: cancelling an unknown id yields
/// `task_not_found`, cancelling a terminal task yields
/// `task_not_cancelable`, and cancelling a task in flight fires its
/// per-task token. To serve both message types with one worker, register an
/// `Arc<TaskWorker>` for each.
pub struct TaskWorker {
    skills: HashMap<Arc<str>, Arc<dyn SkillExecutor>>,
    /// Every task this worker has accepted, by id. Entries are retained
    /// after the terminal transition, so late cancellations are answered
    /// accurately.
    tasks: DashMap<Arc<str>, TaskEntry>,
    /// Released on the first terminal transition when the worker runs in
    /// single-shot mode.
    single_shot: Option<Latch>,
}

/// One tracked task of a [`TaskWorker`].
struct TaskEntry {
    /// Fires when the task is cancelled; a child of the subscription-scoped
    /// token, so host shutdown fires it too.
    cancel: CancellationToken,
    terminal: AtomicBool,
}

impl TaskEntry {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            terminal: AtomicBool::new(false),
        }
    }

    fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    fn mark_terminal(&self) {
        self.terminal.store(true, Ordering::Release);
    }
}

impl TaskWorker {
    /// Creates a worker with no skills; add them with
    /// [`with_skill`](TaskWorker::with_skill).
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
            tasks: DashMap::new(),
            single_shot: None,
        }
    }

    /// Registers an executor for the given skill name.
    pub fn with_skill(mut self, name: impl AsRef<str>, executor: Arc<dyn SkillExecutor>) -> Self {
        self.skills.insert(Arc::from(name.as_ref()), executor);

        self
    }

    /// Switches this worker into single-shot mode: the returned [`Gate`]
    /// opens after the first task reaches a terminal state, at which point
    /// an ephemeral worker process is expected to run its shutdown routine.
    /// Broker redelivery of the unacknowledged request is the safety net if
    /// the process crashes first.
    pub fn single_shot(mut self) -> (Self, Gate) {
        let latch = Latch::new();
        let gate = latch.gate();
        self.single_shot = Some(latch);

        (self, gate)
    }
}

impl Default for TaskWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Respond<AgentTaskRequest> for TaskWorker {
    async fn respond(
        &self,
        request: AgentTaskRequest,
        ctx: &HandlerContext,
    ) -> Result<OutboundReply, HandlerFault> {
        // Track the task first, so cancellations can find it; re-submitting
        // a known task id is a malformed request
        let task_token = match self.track_task(&request.task_id, ctx) {
            Some(token) => token,
            None => {
                warn!(
                    task_id = request.task_id.as_str(),
                    "Task id was already submitted",
                );

                return Ok(OutboundReply::encode(&AgentTaskError {
                    task_id: request.task_id.clone(),
                    code: ErrorCode::InvalidRequest,
                    message: format!("the task '{}' was already submitted", request.task_id),
                    is_retryable: false,
                })?);
            }
        };

        let reply = match self.skills.get(request.skill.as_str()) {
            None => {
                warn!(
                    task_id = request.task_id.as_str(),
                    skill = request.skill.as_str(),
                    "Task request for an unsupported skill",
                );
                self.finish_task(&request.task_id);

                OutboundReply::encode(&AgentTaskError {
                    task_id: request.task_id.clone(),
                    code: ErrorCode::SkillNotSupported,
                    message: format!("the skill '{}' is not supported here", request.skill),
                    is_retryable: false,
                })?
            }

            Some(executor) => {
                let updates = TaskUpdates {
                    publisher: Arc::clone(ctx.publisher()),
                    reply_to: ctx.envelope().reply_to().cloned(),
                    correlation_id: ctx.envelope().correlation_id().map(Arc::from),
                    task_id: Arc::from(request.task_id.as_str()),
                    source: Arc::from(ctx.agent_name()),
                };

                // Submitted → Working is the first observable transition
                updates.working(None).await;

                // The executor runs under the per-task token, which fires on
                // host shutdown or on an explicit cancellation request
                let conclusion = executor.run(&request, &updates, &task_token).await;
                self.finish_task(&request.task_id);

                // A host-shutdown cancellation must propagate as a fault,
                // not a reply
                if ctx.cancel().is_cancelled() {
                    self.release_single_shot();
                    return Err(HandlerFault::execution("host shutdown during the task"));
                }

                match conclusion {
                    Ok(conclusion) => {
                        info!(
                            task_id = request.task_id.as_str(),
                            skill = request.skill.as_str(),
                            state = %conclusion.state,
                            "Task reached a terminal state",
                        );

                        OutboundReply::encode(&AgentTaskResult {
                            task_id: request.task_id.clone(),
                            state: conclusion.state,
                            message: conclusion.message,
                        })?
                    }

                    Err(fault) => {
                        warn!(
                            task_id = request.task_id.as_str(),
                            skill = request.skill.as_str(),
                            code = fault.code().as_str(),
                            "Task failed",
                        );

                        OutboundReply::encode(&AgentTaskError {
                            task_id: request.task_id.clone(),
                            code: fault.code(),
                            message: fault.to_string(),
                            is_retryable: fault.is_retryable(),
                        })?
                    }
                }
            }
        };

        self.release_single_shot();

        Ok(reply)
    }
}

#[async_trait]
impl Respond<AgentTaskCancelRequest> for TaskWorker {
    async fn respond(
        &self,
        request: AgentTaskCancelRequest,
        _ctx: &HandlerContext,
    ) -> Result<OutboundReply, HandlerFault> {
        let reply = match self.tasks.get(request.task_id.as_str()) {
            // Never seen here
            None => {
                warn!(
                    task_id = request.task_id.as_str(),
                    "Cancellation for an unknown task",
                );

                OutboundReply::encode(&AgentTaskError {
                    task_id: request.task_id.clone(),
                    code: ErrorCode::TaskNotFound,
                    message: format!("no task '{}' is known here", request.task_id),
                    is_retryable: false,
                })?
            }

            // Already terminal: nothing left to cancel
            Some(entry) if entry.is_terminal() => OutboundReply::encode(&AgentTaskError {
                task_id: request.task_id.clone(),
                code: ErrorCode::TaskNotCancelable,
                message: format!(
                    "the task '{}' has already reached a terminal state",
                    request.task_id,
                ),
                is_retryable: false,
            })?,

            // In flight: fire the per-task token; the executor winds down
            // and the submitter receives the cancelled terminal reply
            Some(entry) => {
                entry.cancel.cancel();
                entry.mark_terminal();

                info!(
                    task_id = request.task_id.as_str(),
                    "Cancellation accepted",
                );

                OutboundReply::encode(&AgentTaskResult {
                    task_id: request.task_id.clone(),
                    state: TaskState::Cancelled,
                    message: "cancellation accepted".to_string(),
                })?
            }
        };

        Ok(reply)
    }
}

impl TaskWorker {
    /// Registers a task in the tracking table and derives its cancellation
    /// token from the subscription-scoped one. Returns [`None`] when the
    /// task id is already taken.
    fn track_task(&self, task_id: &str, ctx: &HandlerContext) -> Option<CancellationToken> {
        use dashmap::mapref::entry::Entry;

        match self.tasks.entry(Arc::from(task_id)) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let token = ctx.cancel().child_token();
                vacant.insert(TaskEntry::new(token.clone()));

                Some(token)
            }
        }
    }

    /// Marks a tracked task as terminal. The entry is retained, so a late
    /// cancellation is answered with `task_not_cancelable` rather than
    /// `task_not_found`.
    fn finish_task(&self, task_id: &str) {
        if let Some(entry) = self.tasks.get(task_id) {
            entry.mark_terminal();
        }
    }

    fn release_single_shot(&self) {
        if let Some(latch) = &self.single_shot {
            latch.release();
        }
    }
}
