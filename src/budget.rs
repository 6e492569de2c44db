//! External usage-budget tracking. The monitor only reports; control
//! decisions (wind-down, pause) belong to the cycle engine.

use crate::error::{ForemanError, Result};
use crate::types::UsageSnapshot;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_WIND_DOWN_THRESHOLD: f64 = 0.80;
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 0.90;
pub const DEFAULT_RESUME_THRESHOLD: f64 = 0.50;
const RESET_RECHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Threshold crossing level, recomputed on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLevel {
    Normal,
    WindDown,
    Critical,
}

/// Usage endpoint payload: utilization is a percentage (0-100) that we
/// normalize to [0, 1].
#[derive(Debug, Deserialize)]
struct UsagePayload {
    five_hour: UsageWindow,
}

#[derive(Debug, Deserialize)]
struct UsageWindow {
    utilization: f64,
    #[serde(default)]
    resets_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BudgetThresholds {
    pub wind_down: f64,
    pub critical: f64,
    pub resume: f64,
}

impl Default for BudgetThresholds {
    fn default() -> Self {
        Self {
            wind_down: DEFAULT_WIND_DOWN_THRESHOLD,
            critical: DEFAULT_CRITICAL_THRESHOLD,
            resume: DEFAULT_RESUME_THRESHOLD,
        }
    }
}

/// Polls the usage endpoint and exposes the latest snapshot. With no
/// endpoint configured the monitor reports `Normal` forever, which
/// degrades to "no budget enforcement" rather than failing the run.
pub struct BudgetMonitor {
    thresholds: BudgetThresholds,
    latest: Arc<RwLock<Option<UsageSnapshot>>>,
    poller: Option<JoinHandle<()>>,
    client: Option<UsageClient>,
}

#[derive(Debug, Clone)]
struct UsageClient {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl UsageClient {
    async fn fetch(&self) -> Result<UsageSnapshot> {
        let mut request = self.http.get(&self.url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let payload: UsagePayload = request
            .send()
            .await
            .map_err(|err| ForemanError::Internal(format!("usage endpoint: {err}")))?
            .error_for_status()
            .map_err(|err| ForemanError::Internal(format!("usage endpoint: {err}")))?
            .json()
            .await
            .map_err(|err| ForemanError::Internal(format!("usage payload: {err}")))?;

        Ok(UsageSnapshot {
            utilization: (payload.five_hour.utilization / 100.0).clamp(0.0, 1.0),
            resets_at: payload.five_hour.resets_at,
            captured_at: Utc::now(),
        })
    }
}

impl BudgetMonitor {
    #[must_use]
    pub fn new(thresholds: BudgetThresholds, url: Option<String>, token: Option<String>) -> Self {
        let client = url.map(|url| UsageClient {
            http: reqwest::Client::new(),
            url,
            token,
        });
        Self {
            thresholds,
            latest: Arc::new(RwLock::new(None)),
            poller: None,
            client,
        }
    }

    /// Start the background poll loop. `on_level` fires on every poll
    /// where a threshold is crossed, not just the first.
    pub fn start<F>(&mut self, interval: Duration, on_level: F)
    where
        F: Fn(BudgetLevel, &UsageSnapshot) + Send + Sync + 'static,
    {
        let Some(client) = self.client.clone() else {
            debug!("no usage endpoint configured; budget monitor idle");
            return;
        };
        let latest = Arc::clone(&self.latest);
        let thresholds = self.thresholds.clone();

        self.poller = Some(tokio::spawn(async move {
            loop {
                match client.fetch().await {
                    Ok(snapshot) => {
                        let level = level_for(&thresholds, snapshot.utilization);
                        if level != BudgetLevel::Normal {
                            on_level(level, &snapshot);
                        }
                        if let Ok(mut slot) = latest.write() {
                            *slot = Some(snapshot);
                        }
                    }
                    Err(err) => warn!(error = %err, "usage poll failed"),
                }
                tokio::time::sleep(interval).await;
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<UsageSnapshot> {
        self.latest.read().ok().and_then(|slot| slot.clone())
    }

    fn utilization(&self) -> f64 {
        self.snapshot().map_or(0.0, |s| s.utilization)
    }

    /// True when utilization meets or exceeds the wind-down threshold.
    #[must_use]
    pub fn is_wind_down(&self) -> bool {
        self.utilization() >= self.thresholds.wind_down
    }

    /// True when utilization meets or exceeds the critical threshold.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.utilization() >= self.thresholds.critical
    }

    /// Block until the reported reset time passes and a fresh poll
    /// shows utilization below the resume threshold. With no reset
    /// time, re-poll in 60 s increments.
    pub async fn wait_for_reset(&self) -> Result<()> {
        let Some(client) = self.client.clone() else {
            return Ok(());
        };

        if let Some(resets_at) = self.snapshot().and_then(|s| s.resets_at) {
            let until = (resets_at - Utc::now()).num_seconds();
            if until > 0 {
                debug!(seconds = until, "sleeping until budget reset");
                tokio::time::sleep(Duration::from_secs(until.unsigned_abs())).await;
            }
        }

        loop {
            let snapshot = client.fetch().await?;
            if let Ok(mut slot) = self.latest.write() {
                *slot = Some(snapshot.clone());
            }
            if snapshot.utilization < self.thresholds.resume {
                return Ok(());
            }
            debug!(
                utilization = snapshot.utilization,
                "budget still above resume threshold"
            );
            tokio::time::sleep(RESET_RECHECK_INTERVAL).await;
        }
    }

    /// Inject a snapshot directly. Used by tests and by the engine when
    /// restoring persisted state.
    pub fn inject_snapshot(&self, snapshot: UsageSnapshot) {
        if let Ok(mut slot) = self.latest.write() {
            *slot = Some(snapshot);
        }
    }
}

impl Drop for BudgetMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn level_for(thresholds: &BudgetThresholds, utilization: f64) -> BudgetLevel {
    if utilization >= thresholds.critical {
        BudgetLevel::Critical
    } else if utilization >= thresholds.wind_down {
        BudgetLevel::WindDown
    } else {
        BudgetLevel::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::{level_for, BudgetLevel, BudgetMonitor, BudgetThresholds};
    use crate::types::UsageSnapshot;
    use chrono::Utc;

    fn snapshot(utilization: f64) -> UsageSnapshot {
        UsageSnapshot {
            utilization,
            resets_at: None,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn thresholds_trigger_at_exactly_the_boundary() {
        let thresholds = BudgetThresholds::default();
        assert_eq!(level_for(&thresholds, 0.79), BudgetLevel::Normal);
        assert_eq!(level_for(&thresholds, 0.80), BudgetLevel::WindDown);
        assert_eq!(level_for(&thresholds, 0.89), BudgetLevel::WindDown);
        assert_eq!(level_for(&thresholds, 0.90), BudgetLevel::Critical);
        assert_eq!(level_for(&thresholds, 1.0), BudgetLevel::Critical);
    }

    #[test]
    fn monitor_predicates_follow_the_injected_snapshot() {
        let monitor = BudgetMonitor::new(BudgetThresholds::default(), None, None);
        assert!(!monitor.is_wind_down());
        assert!(!monitor.is_critical());

        monitor.inject_snapshot(snapshot(0.80));
        assert!(monitor.is_wind_down());
        assert!(!monitor.is_critical());

        monitor.inject_snapshot(snapshot(0.95));
        assert!(monitor.is_critical());
        assert!(monitor.is_wind_down());
    }

    #[tokio::test]
    async fn wait_for_reset_is_immediate_without_an_endpoint() {
        let monitor = BudgetMonitor::new(BudgetThresholds::default(), None, None);
        monitor.inject_snapshot(snapshot(0.99));
        monitor.wait_for_reset().await.expect("wait");
    }
}
