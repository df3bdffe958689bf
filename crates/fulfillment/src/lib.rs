//! Order fulfillment saga.
//!
//! This crate drives an order from placement to completion as a series of
//! idempotent jobs:
//! 1. Check and reserve inventory for every line
//! 2. Capture the attached payment (inline for cards and wallets, via a
//!    delayed confirmation job for bank transfers)
//! 3. Finalize: clear the cart, award loyalty points, schedule shipment,
//!    confirmation and analytics
//!
//! Failures move the order or payment to a terminal state and notify the
//! recipients picked by their [`domain::FailureKind`]. Nothing is rolled back.

pub mod config;
pub mod error;
pub mod jobs;
pub mod notification;
pub mod order_processor;
pub mod payment_processor;
pub mod services;

pub use config::FulfillmentConfig;
pub use error::{FulfillmentError, Result};
pub use jobs::{Job, JobContext, JobHandler, JobOutcome};
pub use notification::{
    NotificationEvent, NotificationRouter, NotificationType, OpsTeam, Recipient, ReferenceType,
};
pub use order_processor::{AdvanceOutcome, OrderProcessor};
pub use payment_processor::{PaymentOutcome, PaymentProcessor};
pub use services::{
    CartService, Collaborators, FakeGateway, FakeResponse, GatewayClient, GatewayDispatcher,
    GatewayError, InMemoryCartService, InMemoryLoyaltyService, JobScheduler, LoggingDelivery,
    LoyaltyService, NotificationDelivery, RecordingDelivery, RecordingScheduler,
};
