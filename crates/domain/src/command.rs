//! Load-decide-append cycle for aggregates.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// A command addressed to a single aggregate.
pub trait Command: Send + Sync {
    /// The aggregate type this command targets.
    type Aggregate: Aggregate;

    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;
}

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

impl<A: Aggregate> CommandResult<A> {
    /// Returns true if the command produced no events.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Executes commands against aggregates stored in an [`EventStore`].
///
/// Every append carries the version the aggregate was loaded at, so two
/// writers deciding on the same state cannot both commit.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
    A::Event: DeserializeOwned + Serialize,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate, returning a default instance if it has no events.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Executes a command once.
    ///
    /// A concurrent writer surfaces as `DomainError::EventStore(ConcurrencyConflict)`.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.try_execute(aggregate_id, None, command_fn).await
    }

    /// Executes a command, reloading and re-deciding on concurrency conflicts.
    ///
    /// This is the optimistic-retry loop used where contention is expected
    /// (hot stock records). The command is re-evaluated against fresh state
    /// on every attempt, so a check such as "enough stock on hand" is always
    /// made against the state the append is conditional on.
    pub async fn execute_with_retry<F>(
        &self,
        aggregate_id: AggregateId,
        causation_id: Option<AggregateId>,
        max_attempts: u32,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut attempt = 1;
        loop {
            match self
                .try_execute(aggregate_id, causation_id, &command_fn)
                .await
            {
                Err(DomainError::EventStore(e)) if e.is_conflict() && attempt < max_attempts => {
                    tracing::debug!(%aggregate_id, attempt, "concurrency conflict, retrying");
                    metrics::counter!("command_conflict_retries_total").increment(1);
                    attempt += 1;
                }
                Err(DomainError::EventStore(e)) if e.is_conflict() => {
                    return Err(DomainError::ContentionExhausted {
                        aggregate_type: A::aggregate_type(),
                        aggregate_id,
                        attempts: attempt,
                    });
                }
                other => return other,
            }
        }
    }

    async fn try_execute<F>(
        &self,
        aggregate_id: AggregateId,
        causation_id: Option<AggregateId>,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;
        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                new_version: current_version,
            });
        }

        let envelopes =
            self.build_envelopes(aggregate_id, current_version, causation_id, &events)?;
        let new_version = self
            .store
            .append(envelopes, AppendOptions::from_loaded(current_version))
            .await?;

        for event in &events {
            aggregate.apply(event.clone());
        }
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        causation_id: Option<AggregateId>,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let mut builder = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?;
            if let Some(causation_id) = causation_id {
                builder = builder.caused_by(causation_id);
            }
            let envelope = builder.build().ok_or(DomainError::IncompleteEnvelope {
                aggregate_type: A::aggregate_type(),
            })?;
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}
