//! Emergency Mode Controller.
//!
//! Two states. Normal moves to Emergency when peak utilization reaches the
//! configured threshold; Emergency moves back once load drops below it or the
//! mode has run longer than `max_duration_minutes`, whichever comes first.
//!
//! The state lives in a watch channel. [`EmergencyController::state`] copies
//! it out under the channel's read lock, so a reader never observes `active`
//! without its `started_at`, but the read is not lock-free.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use utoipa::ToSchema;

use crate::config::{EmergencyConfig, SharedConfig};
use crate::load::SystemLoadMonitor;
use crate::task::PeriodicTask;

/// `started_at` is set exactly when `active` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct EmergencyModeState {
    pub active: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl EmergencyModeState {
    pub const NORMAL: Self = Self {
        active: false,
        started_at: None,
    };

    pub fn activated_at(now: DateTime<Utc>) -> Self {
        Self {
            active: true,
            started_at: Some(now),
        }
    }

    /// Elapsed time in emergency mode; `None` in normal mode.
    pub fn duration_at(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        match (self.active, self.started_at) {
            (true, Some(started_at)) => Some((now - started_at).max(chrono::Duration::zero())),
            _ => None,
        }
    }
}

impl Default for EmergencyModeState {
    fn default() -> Self {
        Self::NORMAL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationCause {
    LoadRecovered,
    MaxDurationExceeded,
    Disabled,
}

impl DeactivationCause {
    pub fn as_str(self) -> &'static str {
        match self {
            DeactivationCause::LoadRecovered => "load_recovered",
            DeactivationCause::MaxDurationExceeded => "max_duration_exceeded",
            DeactivationCause::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Activated,
    Deactivated(DeactivationCause),
}

/// One evaluation step. Re-evaluating an unchanged situation returns the same
/// state, `started_at` included.
pub fn evaluate(
    state: EmergencyModeState,
    peak_utilization: f64,
    config: &EmergencyConfig,
    now: DateTime<Utc>,
) -> (EmergencyModeState, Transition) {
    let overloaded = peak_utilization >= config.trigger_threshold;

    match state.started_at.filter(|_| state.active) {
        None => {
            if config.enabled && overloaded {
                (
                    EmergencyModeState::activated_at(now),
                    Transition::Activated,
                )
            } else {
                (EmergencyModeState::NORMAL, Transition::Unchanged)
            }
        }
        Some(started_at) => {
            let cause = if !config.enabled {
                Some(DeactivationCause::Disabled)
            } else if !overloaded {
                Some(DeactivationCause::LoadRecovered)
            } else if now - started_at > config.max_duration() {
                Some(DeactivationCause::MaxDurationExceeded)
            } else {
                None
            };
            match cause {
                Some(cause) => (EmergencyModeState::NORMAL, Transition::Deactivated(cause)),
                None => (state, Transition::Unchanged),
            }
        }
    }
}

pub struct EmergencyController {
    monitor: Arc<SystemLoadMonitor>,
    config: SharedConfig,
    state: watch::Sender<EmergencyModeState>,
    interval: Duration,
    task: PeriodicTask,
}

impl EmergencyController {
    pub fn new(monitor: Arc<SystemLoadMonitor>, config: SharedConfig, interval: Duration) -> Self {
        let (state, _) = watch::channel(EmergencyModeState::NORMAL);
        Self {
            monitor,
            config,
            state,
            interval,
            task: PeriodicTask::new("emergency_mode_controller"),
        }
    }

    pub fn state(&self) -> EmergencyModeState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EmergencyModeState> {
        self.state.subscribe()
    }

    /// Evaluate the latest load snapshot once.
    pub fn check(&self) -> Transition {
        self.check_at(Utc::now())
    }

    pub fn check_at(&self, now: DateTime<Utc>) -> Transition {
        let snapshot = self.monitor.snapshot();
        let config = self.config.current();
        let peak = snapshot.peak_utilization();
        let previous = self.state();
        let (next, transition) = evaluate(previous, peak, &config.emergency, now);

        match transition {
            Transition::Unchanged => {}
            Transition::Activated => {
                self.state.send_replace(next);
                tracing::warn!(
                    cpu = snapshot.cpu,
                    memory = snapshot.memory,
                    threshold = config.emergency.trigger_threshold,
                    emergency_multiplier = config.emergency.emergency_multiplier,
                    "emergency mode activated"
                );
            }
            Transition::Deactivated(cause) => {
                self.state.send_replace(next);
                let duration_ms = previous
                    .duration_at(now)
                    .map(|d| d.num_milliseconds())
                    .unwrap_or(0);
                tracing::info!(
                    cause = cause.as_str(),
                    duration_ms,
                    cpu = snapshot.cpu,
                    memory = snapshot.memory,
                    "emergency mode deactivated"
                );
            }
        }
        transition
    }

    pub async fn start(self: &Arc<Self>) -> bool {
        let controller = self.clone();
        self.task
            .start(self.interval, move || {
                let controller = controller.clone();
                async move {
                    controller.check();
                }
            })
            .await
    }

    pub async fn stop(&self) -> bool {
        self.task.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.task.is_running().await
    }
}
