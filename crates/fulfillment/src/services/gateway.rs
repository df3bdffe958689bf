//! Payment gateway clients, the per-kind dispatcher and a scripted fake.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{AggregateId, Money};
use domain::PaymentMethodKind;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors returned by a gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The gateway answered and refused the payment.
    #[error("rejected: {reason}")]
    Rejected { reason: String },

    /// The gateway could not be reached.
    #[error("unavailable: {message}")]
    Unavailable { message: String },

    /// The call did not finish in time.
    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    /// No client is registered for the method kind.
    #[error("no gateway configured for {kind}")]
    NotConfigured { kind: PaymentMethodKind },
}

/// A capture call.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub payment_id: AggregateId,
    pub amount: Money,
    pub credentials: String,
}

impl CaptureRequest {
    /// The key a gateway uses to collapse retried captures into one charge.
    pub fn idempotency_key(&self) -> String {
        self.payment_id.to_string()
    }
}

/// Client for one payment method kind's gateway.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Captures funds, returning the gateway transaction ID.
    async fn capture(&self, request: &CaptureRequest) -> Result<String, GatewayError>;

    /// Returns true if the gateway corroborates the transaction.
    async fn verify(&self, transaction_id: &str) -> Result<bool, GatewayError>;
}

/// Routes gateway calls by method kind and bounds each call with a timeout.
#[derive(Clone)]
pub struct GatewayDispatcher {
    clients: HashMap<PaymentMethodKind, Arc<dyn GatewayClient>>,
    timeout: Duration,
}

impl GatewayDispatcher {
    /// Creates a dispatcher with no clients.
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            timeout,
        }
    }

    /// Registers the client for a method kind.
    pub fn with_client(mut self, kind: PaymentMethodKind, client: Arc<dyn GatewayClient>) -> Self {
        self.clients.insert(kind, client);
        self
    }

    /// Captures through the kind's gateway.
    #[tracing::instrument(skip(self, request), fields(payment_id = %request.payment_id, amount = %request.amount))]
    pub async fn capture(
        &self,
        kind: PaymentMethodKind,
        request: &CaptureRequest,
    ) -> Result<String, GatewayError> {
        let client = self.client(kind)?;
        match tokio::time::timeout(self.timeout, client.capture(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                after: self.timeout,
            }),
        }
    }

    /// Verifies through the kind's gateway.
    #[tracing::instrument(skip(self))]
    pub async fn verify(
        &self,
        kind: PaymentMethodKind,
        transaction_id: &str,
    ) -> Result<bool, GatewayError> {
        let client = self.client(kind)?;
        match tokio::time::timeout(self.timeout, client.verify(transaction_id)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                after: self.timeout,
            }),
        }
    }

    fn client(&self, kind: PaymentMethodKind) -> Result<&Arc<dyn GatewayClient>, GatewayError> {
        self.clients
            .get(&kind)
            .ok_or(GatewayError::NotConfigured { kind })
    }
}

/// A scripted gateway answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeResponse {
    Approve,
    Reject(String),
    Unavailable,
    /// Never answers; the dispatcher timeout fires.
    Hang,
}

#[derive(Debug, Default)]
struct FakeGatewayState {
    capture_script: VecDeque<FakeResponse>,
    verify_script: VecDeque<FakeResponse>,
    transactions: HashMap<String, String>,
    capture_calls: u32,
    next_id: u32,
}

/// Deterministic gateway for tests and local runs.
///
/// Approves by default. Queued responses are consumed one per call. A
/// retried capture with a known idempotency key returns the original
/// transaction instead of charging again.
#[derive(Debug, Clone)]
pub struct FakeGateway {
    prefix: &'static str,
    state: Arc<Mutex<FakeGatewayState>>,
}

impl FakeGateway {
    /// Creates an approving gateway whose transaction IDs start with `prefix`.
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            state: Arc::default(),
        }
    }

    /// Queues the answer for the next capture.
    pub async fn push_capture(&self, response: FakeResponse) {
        self.state.lock().await.capture_script.push_back(response);
    }

    /// Queues the answer for the next verification.
    pub async fn push_verify(&self, response: FakeResponse) {
        self.state.lock().await.verify_script.push_back(response);
    }

    /// Returns the number of capture calls received, retries included.
    pub async fn capture_calls(&self) -> u32 {
        self.state.lock().await.capture_calls
    }

    /// Returns the number of distinct charges made.
    pub async fn charge_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }
}

#[async_trait]
impl GatewayClient for FakeGateway {
    async fn capture(&self, request: &CaptureRequest) -> Result<String, GatewayError> {
        let response = {
            let mut state = self.state.lock().await;
            state.capture_calls += 1;

            if let Some(existing) = state.transactions.get(&request.idempotency_key()) {
                return Ok(existing.clone());
            }

            match state.capture_script.pop_front().unwrap_or(FakeResponse::Approve) {
                FakeResponse::Approve => {
                    state.next_id += 1;
                    let transaction_id = format!("{}_{:06}", self.prefix, state.next_id);
                    state
                        .transactions
                        .insert(request.idempotency_key(), transaction_id.clone());
                    return Ok(transaction_id);
                }
                other => other,
            }
        };

        respond_with_failure(response).await
    }

    async fn verify(&self, transaction_id: &str) -> Result<bool, GatewayError> {
        let response = {
            let mut state = self.state.lock().await;
            match state.verify_script.pop_front().unwrap_or(FakeResponse::Approve) {
                FakeResponse::Approve => {
                    return Ok(state.transactions.values().any(|t| t == transaction_id));
                }
                FakeResponse::Reject(_) => return Ok(false),
                other => other,
            }
        };

        respond_with_failure(response).await
    }
}

async fn respond_with_failure<T>(response: FakeResponse) -> Result<T, GatewayError> {
    match response {
        FakeResponse::Reject(reason) => Err(GatewayError::Rejected { reason }),
        FakeResponse::Unavailable => Err(GatewayError::Unavailable {
            message: "gateway unavailable".to_string(),
        }),
        FakeResponse::Hang => {
            std::future::pending::<()>().await;
            Err(GatewayError::Unavailable {
                message: "gateway hung".to_string(),
            })
        }
        FakeResponse::Approve => Err(GatewayError::Unavailable {
            message: "unexpected approval".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(payment_id: AggregateId) -> CaptureRequest {
        CaptureRequest {
            payment_id,
            amount: Money::from_cents(2500),
            credentials: "tok_visa".to_string(),
        }
    }

    fn dispatcher(card: &FakeGateway, timeout: Duration) -> GatewayDispatcher {
        GatewayDispatcher::new(timeout).with_client(PaymentMethodKind::Card, Arc::new(card.clone()))
    }

    #[tokio::test]
    async fn test_capture_is_idempotent_per_payment() {
        let card = FakeGateway::new("card");
        let payment_id = AggregateId::new();

        let first = card.capture(&request(payment_id)).await.unwrap();
        let second = card.capture(&request(payment_id)).await.unwrap();

        assert!(first.starts_with("card_"));
        assert_eq!(first, second);
        assert_eq!(card.capture_calls().await, 2);
        assert_eq!(card.charge_count().await, 1);
        assert!(card.verify(&first).await.unwrap());
        assert!(!card.verify("card_unknown").await.unwrap());
    }

    #[tokio::test]
    async fn test_scripted_rejection() {
        let card = FakeGateway::new("card");
        card.push_capture(FakeResponse::Reject("insufficient_funds".to_string()))
            .await;

        let result = card.capture(&request(AggregateId::new())).await;
        assert_eq!(
            result,
            Err(GatewayError::Rejected {
                reason: "insufficient_funds".to_string()
            })
        );
        assert_eq!(card.charge_count().await, 0);
    }

    #[tokio::test]
    async fn test_dispatcher_times_out_hung_gateway() {
        let card = FakeGateway::new("card");
        card.push_capture(FakeResponse::Hang).await;
        let dispatcher = dispatcher(&card, Duration::from_millis(20));

        let result = dispatcher
            .capture(PaymentMethodKind::Card, &request(AggregateId::new()))
            .await;

        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_dispatcher_without_client() {
        let dispatcher = dispatcher(&FakeGateway::new("card"), Duration::from_secs(1));
        let result = dispatcher.verify(PaymentMethodKind::Wallet, "wallet_1").await;
        assert_eq!(
            result,
            Err(GatewayError::NotConfigured {
                kind: PaymentMethodKind::Wallet
            })
        );
    }
}
