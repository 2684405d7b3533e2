//! Maps a resource-availability reading to "run now or defer" and a [`Tier`].

use serde::Serialize;

use crate::{ResourceStatus, Tier};

pub const DEFAULT_PRICE_THRESHOLD: f64 = 0.70;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyPolicy {
    pub price_threshold: f64,
    /// Answer used when the signal (or its price) is unavailable.
    pub fail_open: bool,
}

impl Default for EnergyPolicy {
    fn default() -> Self {
        Self {
            price_threshold: DEFAULT_PRICE_THRESHOLD,
            fail_open: true,
        }
    }
}

/// Outcome of one policy evaluation, including the reading it was based on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDecision {
    pub process_now: bool,
    pub tier: Tier,
    pub status: Option<ResourceStatus>,
}

impl EnergyPolicy {
    pub fn new(price_threshold: f64, fail_open: bool) -> Self {
        Self {
            price_threshold,
            fail_open,
        }
    }

    pub fn should_process_now(&self, status: Option<&ResourceStatus>) -> bool {
        let Some(status) = status else {
            return self.fail_open;
        };
        if status.renewable_available == Some(true) {
            return true;
        }
        match status.price {
            Some(price) => price < self.price_threshold,
            None => self.fail_open,
        }
    }

    pub fn tier(&self, status: Option<&ResourceStatus>) -> Tier {
        let known_price = status.and_then(|s| s.price).is_some();
        let renewable = status.and_then(|s| s.renewable_available) == Some(true);

        match (self.should_process_now(status), renewable || known_price) {
            (true, true) => Tier::Large,
            // Proceeding blind on fail-open.
            (true, false) => Tier::Fast,
            (false, _) => Tier::Eco,
        }
    }

    pub fn decide(&self, status: Option<ResourceStatus>) -> PolicyDecision {
        PolicyDecision {
            process_now: self.should_process_now(status.as_ref()),
            tier: self.tier(status.as_ref()),
            status,
        }
    }
}
