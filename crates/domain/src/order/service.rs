//! Order service providing a simplified API for order operations.

use common::AggregateId;
use event_store::EventStore;

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{
    AttachPayment, CancelOrder, CompleteOrder, DeferPayment, FailOrder, MarkInventoryChecked,
    MarkPaid, Order, PlaceOrder, RecordFollowUp, StartProcessing,
};

/// Service for managing orders.
///
/// Wraps the command handler; every method is a single conditional append,
/// so a concurrent writer surfaces as a conflict the caller can inspect with
/// [`DomainError::is_conflict`].
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    /// Creates a new order service with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    /// Places a new order.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<CommandResult<Order>, DomainError> {
        let PlaceOrder {
            order_id,
            customer_id,
            lines,
        } = cmd;

        self.handler
            .execute(order_id, |order| order.place(order_id, customer_id, lines))
            .await
    }

    /// Attaches a payment attempt to an order.
    #[tracing::instrument(skip(self))]
    pub async fn attach_payment(
        &self,
        cmd: AttachPayment,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.attach_payment(cmd.payment_id))
            .await
    }

    /// Claims an order for processing.
    #[tracing::instrument(skip(self))]
    pub async fn start_processing(
        &self,
        cmd: StartProcessing,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.start_processing())
            .await
    }

    /// Records a successful inventory check.
    #[tracing::instrument(skip(self))]
    pub async fn mark_inventory_checked(
        &self,
        cmd: MarkInventoryChecked,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.mark_inventory_checked())
            .await
    }

    /// Parks an order until its payment is confirmed.
    #[tracing::instrument(skip(self))]
    pub async fn defer_payment(
        &self,
        cmd: DeferPayment,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.defer_payment(cmd.payment_id))
            .await
    }

    /// Marks an order paid.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(&self, cmd: MarkPaid) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.mark_paid(cmd.payment_id))
            .await
    }

    /// Records a scheduled follow-up job.
    #[tracing::instrument(skip(self))]
    pub async fn record_follow_up(
        &self,
        cmd: RecordFollowUp,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.record_follow_up(cmd.follow_up))
            .await
    }

    /// Completes an order.
    #[tracing::instrument(skip(self))]
    pub async fn complete_order(
        &self,
        cmd: CompleteOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute(cmd.order_id, |order| order.complete(cmd.loyalty_points))
            .await
    }

    /// Cancels an order.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        cmd: CancelOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        let CancelOrder {
            order_id,
            reason,
            cancelled_by,
        } = cmd;

        self.handler
            .execute(order_id, |order| order.cancel(reason, cancelled_by))
            .await
    }

    /// Moves an order to `Error`.
    #[tracing::instrument(skip(self))]
    pub async fn fail_order(&self, cmd: FailOrder) -> Result<CommandResult<Order>, DomainError> {
        let FailOrder {
            order_id,
            note,
            category,
        } = cmd;

        self.handler
            .execute(order_id, |order| order.fail(note, category))
            .await
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }
}
