use async_trait::async_trait;
use std::future::Future;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Handles one decoded event from a subscription. A failing handler keeps the
/// subscription's offset where it is; the event is redelivered on the next
/// tick.
#[async_trait]
pub trait SubscriptionHandler<E>: Send + Sync + 'static {
    async fn handle(&self, event: E) -> Result<(), HandlerError>;
}

#[async_trait]
impl<E, F, Fut> SubscriptionHandler<E> for F
where
    E: Send + 'static,
    F: Send + Sync + 'static + Fn(E) -> Fut,
    Fut: Send + Future<Output = Result<(), HandlerError>>,
{
    async fn handle(&self, event: E) -> Result<(), HandlerError> {
        self(event).await
    }
}
