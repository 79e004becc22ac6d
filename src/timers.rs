//! Timer Scheduler
//!
//! Background poller that claims due wakes and feeds them to the engine as
//! timer triggers. A wake is completed once the engine has consumed it or
//! proved it stale; wakes that hit a busy session or a storage error stay
//! claimed until their claim expires and are picked up again.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::TimersConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::store::TimerWake;
use crate::types::Trigger;

pub struct TimerScheduler {
    engine: Arc<Engine>,
    config: TimersConfig,
    shutdown_token: CancellationToken,
}

impl TimerScheduler {
    pub fn new(engine: Arc<Engine>, shutdown_token: CancellationToken) -> Self {
        let config = engine.config().timers.clone();
        Self {
            engine,
            config,
            shutdown_token,
        }
    }

    /// Poll until the shutdown token is cancelled
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    debug!("Timer scheduler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {
                    if let Err(e) = self.fire_due().await {
                        error!("Error firing due timers: {}", e);
                    }
                }
            }
        }

        debug!("Timer scheduler stopped");
    }

    /// Claim one batch of due wakes and step their sessions.
    ///
    /// Returns how many wakes were completed.
    pub async fn fire_due(&self) -> anyhow::Result<usize> {
        let wakes = self
            .engine
            .timers()
            .claim_due(Utc::now(), self.config.batch_size, self.config.claim_ttl())
            .await?;

        let mut completed = 0;
        for wake in wakes {
            if self.fire(&wake).await? {
                completed += 1;
            }
        }

        if completed > 0 {
            debug!("Fired {} timer wakes", completed);
        }
        Ok(completed)
    }

    async fn fire(&self, wake: &TimerWake) -> anyhow::Result<bool> {
        let result = self
            .engine
            .step(&wake.session_id, Trigger::timer(wake.id.clone()))
            .await;

        let done = match result {
            Ok(_) => true,
            Err(err) if err.is_discardable() => true,
            Err(err @ EngineError::Storage(_)) => {
                error!(timer_id = %wake.id, session_id = %wake.session_id, error = %err, "Timer step failed");
                false
            }
            Err(err) => {
                warn!(timer_id = %wake.id, session_id = %wake.session_id, error = %err, "Timer step deferred");
                false
            }
        };

        if done {
            self.engine.timers().complete_wake(&wake.id).await?;
        }
        Ok(done)
    }
}
