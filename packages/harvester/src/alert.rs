//! Alert collaborator, called on coverage warnings and on rollback.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Emits alerts as `warn` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlerter;

#[async_trait]
impl Alerter for TracingAlerter {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        tracing::warn!(subject, "{body}");
        Ok(())
    }
}
