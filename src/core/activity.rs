// src/core/activity.rs

//! Mirror silence detection.
//!
//! Every successful outbound commit calls `record_activity()`. A periodic
//! check compares the silence against a threshold that depends on the time
//! of day, emits a down alert when it expires, re-alerts every 45 minutes,
//! and reports the measured downtime once activity resumes.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc, Weekday};
use parking_lot::Mutex;
use std::time::Duration;

/// Follow-up alerts while the mirror stays silent.
pub const REPEAT_ALERT_INTERVAL: Duration = Duration::from_secs(45 * 60);

const DAY_THRESHOLD: Duration = Duration::from_secs(45 * 60);
const WEEKEND_THRESHOLD: Duration = Duration::from_secs(90 * 60);
const NIGHT_THRESHOLD: Duration = Duration::from_secs(3 * 60 * 60);

/// What the periodic check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityAlert {
    /// First alert of a silence window.
    Down {
        silent_for: Duration,
        /// Night alerts are posted without `@everyone`.
        night: bool,
    },
    /// A follow-up alert 45 minutes after the previous one.
    StillDown {
        silent_for: Duration,
        night: bool,
    },
}

/// Footer line carried by every inactivity alert.
pub const ALERT_FOOTER: &str = "next alert in 45 min";

impl ActivityAlert {
    pub fn title(&self) -> &'static str {
        match self {
            ActivityAlert::Down { night: true, .. } => "Night inactivity",
            ActivityAlert::Down { .. } => "Mirror inactive",
            ActivityAlert::StillDown { .. } => "Mirror still inactive",
        }
    }

    pub fn night(&self) -> bool {
        match self {
            ActivityAlert::Down { night, .. } | ActivityAlert::StillDown { night, .. } => *night,
        }
    }

    pub fn silent_for(&self) -> Duration {
        match self {
            ActivityAlert::Down { silent_for, .. } | ActivityAlert::StillDown { silent_for, .. } => {
                *silent_for
            }
        }
    }
}

/// The silence threshold and night flag for a local wall-clock instant.
/// Night (23:00–07:00) dominates; otherwise weekends get the longer
/// allowance.
pub fn threshold_for<Tz: chrono::TimeZone>(local: &DateTime<Tz>) -> (Duration, bool) {
    let hour = local.hour();
    if hour >= 23 || hour < 7 {
        return (NIGHT_THRESHOLD, true);
    }
    match local.weekday() {
        Weekday::Sat | Weekday::Sun => (WEEKEND_THRESHOLD, false),
        _ => (DAY_THRESHOLD, false),
    }
}

struct ActivityInner {
    last_activity: DateTime<Utc>,
    down_since: Option<DateTime<Utc>>,
    next_alert_at: Option<DateTime<Utc>>,
}

pub struct ActivityMonitor {
    inner: Mutex<ActivityInner>,
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl ActivityMonitor {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(ActivityInner {
                last_activity: now,
                down_since: None,
                next_alert_at: None,
            }),
        }
    }

    /// Marks a successful outbound commit. Returns the measured downtime
    /// when this commit ends a silence window, so the caller can post the
    /// recovery notice.
    pub fn record_activity(&self, now: DateTime<Utc>) -> Option<Duration> {
        let mut inner = self.inner.lock();
        inner.last_activity = now;
        inner.next_alert_at = None;
        let downtime = inner
            .down_since
            .take()
            .map(|since| (now - since).to_std().unwrap_or_default());
        downtime
    }

    /// Periodic check against the threshold for the given local wall
    /// clock. `now` and `local` describe the same instant; they are split
    /// so tests can pin the time of day.
    pub fn check<Tz: chrono::TimeZone>(
        &self,
        now: DateTime<Utc>,
        local: &DateTime<Tz>,
    ) -> Option<ActivityAlert> {
        let (threshold, night) = threshold_for(local);
        let mut inner = self.inner.lock();
        let silent_for = (now - inner.last_activity).to_std().unwrap_or_default();

        match inner.down_since {
            None => {
                if silent_for < threshold {
                    return None;
                }
                inner.down_since = Some(inner.last_activity);
                inner.next_alert_at =
                    Some(now + ChronoDuration::from_std(REPEAT_ALERT_INTERVAL).unwrap_or_default());
                Some(ActivityAlert::Down { silent_for, night })
            }
            Some(_) => {
                let due = inner.next_alert_at.map(|at| now >= at).unwrap_or(false);
                if !due {
                    return None;
                }
                inner.next_alert_at =
                    Some(now + ChronoDuration::from_std(REPEAT_ALERT_INTERVAL).unwrap_or_default());
                Some(ActivityAlert::StillDown { silent_for, night })
            }
        }
    }

    pub fn is_down(&self) -> bool {
        self.inner.lock().down_since.is_some()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.inner.lock().last_activity
    }
}

/// Renders a downtime duration the way the alerts display it.
pub fn format_downtime(downtime: Duration) -> String {
    let total_minutes = downtime.as_secs() / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{hours} h {minutes} min")
    } else {
        format!("{minutes} min")
    }
}
