/// The business logic run for every message delivered to a [`Consumer`](super::Consumer).
///
/// # Scope
///
/// `process` does not get access to the underlying channel: the consumer acknowledges the
/// message once `process` is done, whatever its outcome.
/// A returned error is logged and the message is dropped, it is not requeued.
/// A panic is caught and treated the same way.
///
/// `process` is called for one message at a time per consume loop, and may be called again
/// right after for the next message: it must not hold on to `payload`.
#[async_trait::async_trait]
pub trait Job: Send + Sync + 'static {
    async fn process(&self, payload: &[u8]) -> Result<(), anyhow::Error>;
}
