use async_trait::async_trait;

use crate::{ResourceStatus, Tier};

/// The external unit of work. Errors are opaque; the queue records their
/// message and never inspects them.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, payload: &str, tier: Tier) -> anyhow::Result<serde_json::Value>;
}

/// Source of the resource-availability signal. `None` means unavailable.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn current(&self) -> Option<ResourceStatus>;
}

/// Always reports the same reading.
#[derive(Debug, Clone, Default)]
pub struct FixedStatus(pub Option<ResourceStatus>);

impl FixedStatus {
    pub fn unavailable() -> Self {
        Self(None)
    }

    pub fn price(price: f64, renewable_available: bool) -> Self {
        Self(Some(ResourceStatus::new(
            Some(price),
            Some(renewable_available),
        )))
    }
}

#[async_trait]
impl StatusSource for FixedStatus {
    async fn current(&self) -> Option<ResourceStatus> {
        self.0.clone()
    }
}
