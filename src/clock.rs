// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Timestamp rendering.
//!
//! Every log line and state record carries a timestamp. Log lines use a
//! human-readable stamp of the form `<zone> <DD-MM-YYYY> <HH:MM:SS>`, while
//! state records use RFC 3339 so both shell and PowerShell can parse them.
//!
//! Nothing in here can fail. If the timezone label cannot be determined, the
//! numeric offset of the local time is used instead.

use chrono::{DateTime, Local};
use std::{env, fs, path::Path};

/// Source of timestamps for logs and state records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clock {
    zone: Option<String>,
}

impl Clock {
    /// Construct new clock with optional configured timezone label.
    ///
    /// A missing label is detected from the environment on each stamp.
    pub fn new(zone: Option<String>) -> Self {
        Self {
            zone: zone.filter(|zone| !zone.trim().is_empty()),
        }
    }

    /// Current local time.
    pub fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    /// Render current local time as a log stamp.
    pub fn now_stamp(&self) -> String {
        self.stamp(&self.now())
    }

    /// Render a point in time as a log stamp.
    pub fn stamp(&self, at: &DateTime<Local>) -> String {
        render(self.zone.clone().or_else(detect_zone), at)
    }
}

/// Render stamp, labelling it with the numeric offset when no zone is known.
fn render(zone: Option<String>, at: &DateTime<Local>) -> String {
    let zone = zone.unwrap_or_else(|| at.format("%:z").to_string());
    format!("{zone} {}", at.format("%d-%m-%Y %H:%M:%S"))
}

/// Best-effort detection of the system timezone name.
fn detect_zone() -> Option<String> {
    if let Some(zone) = env::var("TZ")
        .ok()
        .map(|tz| tz.trim_start_matches(':').trim().to_string())
        .filter(|tz| !tz.is_empty())
    {
        return Some(zone);
    }

    if let Some(zone) = fs::read_to_string("/etc/timezone")
        .ok()
        .map(|content| content.trim().to_string())
        .filter(|zone| !zone.is_empty())
    {
        return Some(zone);
    }

    zone_from_localtime(Path::new("/etc/localtime"))
}

fn zone_from_localtime(path: &Path) -> Option<String> {
    let target = fs::read_link(path).ok()?;
    let target = target.to_string_lossy();
    target
        .split_once("zoneinfo/")
        .map(|(_, zone)| zone.to_string())
        .filter(|zone| !zone.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn stamp_uses_configured_zone() {
        let clock = Clock::new(Some("Europe/Paris".into()));
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(clock.stamp(&at), "Europe/Paris 07-03-2024 09:05:01");
    }

    #[sealed_test(env = [("TZ", ":America/Chicago")])]
    fn stamp_detects_zone_from_tz_variable() {
        let clock = Clock::new(None);
        let at = Local.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(clock.stamp(&at), "America/Chicago 31-12-2024 23:59:59");
    }

    #[test]
    fn unknown_zone_falls_back_to_numeric_offset() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        let result = render(None, &at);

        let (offset, rest) = result.split_once(' ').unwrap();
        assert_eq!(rest, "07-03-2024 09:05:01");
        assert_eq!(offset.len(), 6);
        assert!(offset.starts_with('+') || offset.starts_with('-'));
        assert_eq!(&offset[3..4], ":");
    }

    #[test]
    fn blank_configured_zone_is_ignored() {
        assert_eq!(Clock::new(Some("   ".into())), Clock::new(None));
    }

    #[cfg(unix)]
    #[test]
    fn zone_from_localtime_symlink() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let link = dir.path().join("localtime");
        std::os::unix::fs::symlink("/usr/share/zoneinfo/Asia/Tokyo", &link)?;
        assert_eq!(zone_from_localtime(&link), Some("Asia/Tokyo".into()));
        assert_eq!(zone_from_localtime(&dir.path().join("missing")), None);

        Ok(())
    }
}
