use async_trait::async_trait;
use queue_core::{JobProcessor, Tier};
use reqwest::Client;
use serde_json::{Value, json};

/// Forwards each payload to an HTTP endpoint and stores its JSON reply.
#[derive(Clone)]
pub struct HttpProcessor {
    client: Client,
    url: String,
}

#[derive(serde::Serialize)]
struct ProcessRequest<'a> {
    payload: &'a str,
    tier: Tier,
}

impl HttpProcessor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl JobProcessor for HttpProcessor {
    async fn process(&self, payload: &str, tier: Tier) -> anyhow::Result<Value> {
        let r = self
            .client
            .post(&self.url)
            .json(&ProcessRequest { payload, tier })
            .send()
            .await?;

        if !r.status().is_success() {
            let status = r.status();
            let text = r.text().await.unwrap_or_default();
            anyhow::bail!("processor returned {} {}", status, text);
        }
        Ok(r.json::<Value>().await?)
    }
}

/// Used when no processor endpoint is configured: logs the payload and
/// reports its size.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProcessor;

#[async_trait]
impl JobProcessor for LogProcessor {
    async fn process(&self, payload: &str, tier: Tier) -> anyhow::Result<Value> {
        tracing::info!(%tier, payload, "processing payload");
        Ok(json!({ "tier": tier, "payload_bytes": payload.len() }))
    }
}
