use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use queue_core::{ResourceStatus, StatusSource};
use reqwest::Client;

/// Polls an energy-status endpoint returning
/// `{"electricity_price_eur": 0.42, "solar_available": 1}`.
#[derive(Clone)]
pub struct HttpStatusSource {
    client: Client,
    url: String,
}

#[derive(Debug, serde::Deserialize)]
struct EnergyPayload {
    electricity_price_eur: Option<f64>,
    solar_available: Option<SolarFlag>,
}

/// The simulator reports 0/1; other feeds send a boolean.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum SolarFlag {
    Bool(bool),
    Int(i64),
}

impl EnergyPayload {
    fn into_status(self) -> ResourceStatus {
        let renewable_available = self.solar_available.map(|flag| match flag {
            SolarFlag::Bool(b) => b,
            SolarFlag::Int(n) => n != 0,
        });
        ResourceStatus {
            price: self.electricity_price_eur,
            renewable_available,
            fetched_at: Utc::now(),
        }
    }
}

impl HttpStatusSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn fetch(&self) -> anyhow::Result<ResourceStatus> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<EnergyPayload>()
            .await?;
        Ok(body.into_status())
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn current(&self) -> Option<ResourceStatus> {
        match self.fetch().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(error=%e, url=%self.url, "energy status unavailable");
                None
            }
        }
    }
}
