//! Collaborator traits and their in-memory implementations.

pub mod customer;
pub mod gateway;
pub mod notification;
pub mod scheduler;

use std::sync::Arc;

use domain::PaymentMethodStore;

pub use customer::{
    CartService, InMemoryCartService, InMemoryLoyaltyService, LoyaltyService, NoopCartService,
    NoopLoyaltyService,
};
pub use gateway::{
    CaptureRequest, FakeGateway, FakeResponse, GatewayClient, GatewayDispatcher, GatewayError,
};
pub use notification::{Delivered, LoggingDelivery, NotificationDelivery, RecordingDelivery};
pub use scheduler::{JobScheduler, RecordingScheduler, ScheduledJob};

use crate::notification::NotificationRouter;

/// Everything the state machines call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub gateways: GatewayDispatcher,
    pub methods: Arc<dyn PaymentMethodStore>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub notifier: NotificationRouter,
    pub cart: Arc<dyn CartService>,
    pub loyalty: Arc<dyn LoyaltyService>,
}

impl Collaborators {
    /// Creates collaborators with no-op cart and loyalty services.
    pub fn new(
        gateways: GatewayDispatcher,
        methods: Arc<dyn PaymentMethodStore>,
        scheduler: Arc<dyn JobScheduler>,
        delivery: Arc<dyn NotificationDelivery>,
    ) -> Self {
        Self {
            gateways,
            methods,
            scheduler,
            notifier: NotificationRouter::new(delivery),
            cart: Arc::new(NoopCartService),
            loyalty: Arc::new(NoopLoyaltyService),
        }
    }

    /// Sets the cart service.
    pub fn with_cart(mut self, cart: Arc<dyn CartService>) -> Self {
        self.cart = cart;
        self
    }

    /// Sets the loyalty service.
    pub fn with_loyalty(mut self, loyalty: Arc<dyn LoyaltyService>) -> Self {
        self.loyalty = loyalty;
        self
    }
}
