//! Service status snapshots

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::Serialize;

/// Placeholder for properties the supervisor did not report
const UNKNOWN: &str = "unknown";

/// A read-only snapshot of the supervised service.
///
/// Never cached: a stale snapshot would mislead the operator about whether
/// an update took effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// Whether the service is up (`active_state == "active"`)
    pub is_active: bool,
    /// Coarse state, e.g. `active`, `activating`, `failed`
    pub active_state: String,
    /// Fine-grained state, e.g. `running`, `auto-restart`
    pub sub_state: String,
    /// Whether the unit definition is loaded, e.g. `loaded`, `not-found`
    pub load_state: String,
    /// When the service last entered the active state
    pub active_since: Option<DateTime<Utc>>,
}

impl ServiceStatus {
    /// Parse `systemctl show --property=...` output (`Key=Value` per line).
    pub fn from_show_output(output: &str) -> Self {
        let props: HashMap<&str, &str> = output
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();

        let prop = |key: &str| -> String {
            props
                .get(key)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        let active_state = prop("ActiveState");

        Self {
            is_active: active_state == "active",
            active_state,
            sub_state: prop("SubState"),
            load_state: prop("LoadState"),
            active_since: props
                .get("ActiveEnterTimestamp")
                .and_then(|raw| parse_timestamp(raw)),
        }
    }

    /// Time since activation, if the service is active and the supervisor
    /// reported an activation timestamp.
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        if !self.is_active {
            return None;
        }
        let since = self.active_since?;
        let delta = now.signed_duration_since(since);
        (delta >= TimeDelta::zero()).then_some(delta)
    }
}

/// Render a duration as `2d 3h 4m`, `3h 4m`, `4m 5s` or `5s`.
pub fn format_uptime(delta: TimeDelta) -> String {
    let total = delta.num_seconds().max(0);
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        (total % 86_400) / 3_600,
        (total % 3_600) / 60,
        total % 60,
    );

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Parse a systemd timestamp.
///
/// Accepts `@<unix-seconds>` and the default `Thu 2026-10-15 12:00:00 UTC`
/// form. Zone abbreviations other than UTC are taken as the host's local
/// zone, which is where the supervisor runs.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "n/a" {
        return None;
    }

    if let Some(secs) = raw.strip_prefix('@') {
        let secs: i64 = secs.split('.').next()?.parse().ok()?;
        return Utc.timestamp_opt(secs, 0).single();
    }

    let parts: Vec<&str> = raw.split_whitespace().collect();
    let (date, time, zone) = match parts.as_slice() {
        [_weekday, date, time, zone] => (*date, *time, Some(*zone)),
        [_weekday, date, time] => (*date, *time, None),
        _ => return None,
    };

    let naive = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").ok()?;
    match zone {
        Some("UTC") => Some(Utc.from_utc_datetime(&naive)),
        _ => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}
