// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tokio::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://database/chores.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_NOTIFY_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_APP_URL: &str = "http://localhost:3000";

/// Hours of the day (UTC) during which no reminder is pushed.
/// `start` is inclusive and `end` exclusive; the range may wrap midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: u32,
    pub end: u32,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self { start: 21, end: 7 }
    }
}

impl QuietHours {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            (self.start..self.end).contains(&hour)
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

impl FromStr for QuietHours {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once('-')
            .with_context(|| format!("Expected quiet hours as START-END, got {:?}", s))?;
        let start: u32 = start.trim().parse().context("Invalid quiet hours start")?;
        let end: u32 = end.trim().parse().context("Invalid quiet hours end")?;
        if start > 23 || end > 23 {
            bail!("Quiet hours must be between 0 and 23, got {}-{}", start, end);
        }
        Ok(Self { start, end })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub notify_interval: Duration,
    /// `None` when quiet hours are turned off.
    pub quiet_hours: Option<QuietHours>,
    /// Base URL put in the links of push notifications.
    pub app_url: String,
}

impl Config {
    /// Reads the `CHORES_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url =
            lookup("CHORES_DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let bind_addr = lookup("CHORES_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("Invalid CHORES_BIND_ADDR")?;

        let notify_interval = match lookup("CHORES_NOTIFY_INTERVAL_SECS") {
            Some(secs) => secs
                .trim()
                .parse::<u64>()
                .context("Invalid CHORES_NOTIFY_INTERVAL_SECS")?,
            None => DEFAULT_NOTIFY_INTERVAL_SECS,
        };
        if notify_interval == 0 {
            bail!("CHORES_NOTIFY_INTERVAL_SECS must be greater than zero");
        }

        let quiet_hours = match lookup("CHORES_QUIET_HOURS") {
            Some(value) if value.trim().eq_ignore_ascii_case("off") => None,
            Some(value) => Some(value.parse().context("Invalid CHORES_QUIET_HOURS")?),
            None => Some(QuietHours::default()),
        };

        let app_url = lookup("CHORES_APP_URL")
            .unwrap_or_else(|| DEFAULT_APP_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            database_url,
            bind_addr,
            notify_interval: Duration::from_secs(notify_interval),
            quiet_hours,
            app_url,
        })
    }
}
