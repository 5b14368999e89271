//! Command bus: executes a command, dispatches its events and runs the
//! resulting cascade commands in one unit of work.

use std::collections::VecDeque;
use std::sync::Arc;

use outbox::{CommitSignal, Database};

use crate::admin::PermissionRegistry;
use crate::command::{Command, CommandExecutor, CommandOutcome};
use crate::dispatcher::DomainEventDispatcher;
use crate::error::{DomainError, Result};
use crate::registrations;
use crate::unit_of_work::{Committed, UnitOfWork};

/// Bounds on synchronous propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationLimits {
    /// Most entities one cascade may touch in a transaction.
    pub max_fanout: usize,
    /// Most generations of cascade commands below the sent command.
    pub max_cascade_depth: usize,
}

impl Default for PropagationLimits {
    fn default() -> Self {
        Self {
            max_fanout: 500,
            max_cascade_depth: 4,
        }
    }
}

struct Inner {
    database: Arc<dyn Database>,
    executor: CommandExecutor,
    dispatcher: DomainEventDispatcher,
    signal: CommitSignal,
    limits: PropagationLimits,
}

/// Entry point for every state change.
///
/// Cheap to clone; consumers and sagas hold their own handle.
#[derive(Clone)]
pub struct CommandBus {
    inner: Arc<Inner>,
}

impl CommandBus {
    pub fn new(
        database: Arc<dyn Database>,
        executor: CommandExecutor,
        dispatcher: DomainEventDispatcher,
        signal: CommitSignal,
        limits: PropagationLimits,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                database,
                executor,
                dispatcher,
                signal,
                limits,
            }),
        }
    }

    /// A bus with the default handler registrations.
    pub fn standard(
        database: Arc<dyn Database>,
        signal: CommitSignal,
        permissions: Arc<PermissionRegistry>,
        limits: PropagationLimits,
    ) -> Self {
        Self::new(
            database,
            CommandExecutor::new(permissions, limits.max_fanout),
            registrations::default_dispatcher(limits),
            signal,
            limits,
        )
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.inner.database
    }

    pub fn limits(&self) -> PropagationLimits {
        self.inner.limits
    }

    /// Opens a unit of work for callers that add their own writes (such as
    /// a ledger row) before sending.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        UnitOfWork::begin(self.inner.database.as_ref()).await
    }

    /// Runs a command in a fresh unit of work and commits it.
    ///
    /// On error nothing is committed.
    #[tracing::instrument(skip(self, command), fields(command = command.name()))]
    pub async fn send(&self, command: Command) -> Result<CommandOutcome> {
        let mut uow = self.begin().await?;
        let outcome = match self.send_in(&mut uow, command).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::debug!(error = %err, "command failed, rolling back");
                if let Err(rollback) = uow.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                return Err(err);
            }
        };
        self.commit(uow).await?;
        Ok(outcome)
    }

    /// Runs a command inside `uow` without committing.
    ///
    /// Raised events are dispatched as they appear and the commands their
    /// handlers return run breadth-first in the same unit of work. Returns
    /// the outcome of `command` itself.
    pub async fn send_in(&self, uow: &mut UnitOfWork, command: Command) -> Result<CommandOutcome> {
        let limit = self.inner.limits.max_cascade_depth;
        let mut queue = VecDeque::from([(command, 0usize)]);
        let mut first: Option<CommandOutcome> = None;

        while let Some((command, depth)) = queue.pop_front() {
            if depth > limit {
                return Err(DomainError::CascadeDepthExceeded { limit });
            }

            let name = command.name();
            let outcome = self.inner.executor.execute(uow, command).await?;
            metrics::counter!("commands_executed_total", "command" => name).increment(1);
            tracing::debug!(command = name, depth, events = ?outcome.events, "command executed");

            queue.extend(outcome.follow_ups.iter().cloned().map(|c| (c, depth + 1)));
            while let Some(event) = uow.next_pending() {
                let commands = self.inner.dispatcher.dispatch(uow, &event).await?;
                queue.extend(commands.into_iter().map(|c| (c, depth + 1)));
            }

            if first.is_none() {
                first = Some(outcome);
            }
        }

        Ok(first.unwrap_or_default())
    }

    /// Commits `uow` and wakes the relay if envelopes were appended.
    pub async fn commit(&self, uow: UnitOfWork) -> Result<Committed> {
        let committed = uow.commit().await?;
        if committed.has_envelopes() {
            self.inner.signal.notify();
        }
        Ok(committed)
    }
}
