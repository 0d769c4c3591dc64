use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

pub const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";

/// What the clock face shows at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockReading {
    /// 24-hour `HH:MM:SS`
    pub time: String,
    /// e.g. `Wednesday, January 1, 2025`
    pub date: String,
    pub location: String,
    pub timezone: String,
}

pub fn read_clock(now: DateTime<Utc>, tz: &Tz) -> ClockReading {
    let local = now.with_timezone(tz);
    ClockReading {
        time: local.format("%H:%M:%S").to_string(),
        date: local.format("%A, %B %-d, %Y").to_string(),
        location: location_label(tz),
        timezone: tz.name().to_string(),
    }
}

/// City part of an IANA name, upper-cased: `America/Los_Angeles` -> `LOS ANGELES`.
pub fn location_label(tz: &Tz) -> String {
    let name = tz.name();
    let city = name.rsplit('/').next().unwrap_or(name);
    city.replace('_', " ").to_uppercase()
}

pub fn parse_timezone(raw: &str) -> Result<Tz> {
    raw.parse::<Tz>().map_err(|e| {
        anyhow!(
            "Invalid timezone '{}': {}. Example: 'Asia/Tokyo' or 'America/Los_Angeles'",
            raw,
            e
        )
    })
}
