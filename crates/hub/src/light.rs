//! Light on/off schedule evaluation.

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, Time, UtcOffset};

time::serde::format_description!(hhmm, Time, "[hour]:[minute]");
time::serde::format_description!(
    utc_offset,
    UtcOffset,
    "[offset_hour sign:mandatory]:[offset_minute]"
);

/// Light phase, used to pick the air-temperature band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightPhase {
    LightsOn,
    LightsOff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightSchedule {
    #[serde(with = "hhmm")]
    pub on: Time,
    #[serde(with = "hhmm")]
    pub off: Time,
    /// Offset applied to UTC to get the enclosure's wall clock.
    #[serde(with = "utc_offset", default = "utc")]
    pub utc_offset: UtcOffset,
}

fn utc() -> UtcOffset {
    UtcOffset::UTC
}

impl LightSchedule {
    pub fn local_time(&self, now: OffsetDateTime) -> Time {
        now.to_offset(self.utc_offset).time()
    }

    pub fn should_be_on_at(&self, now: Time) -> bool {
        should_be_on(now, self.on, self.off)
    }

    pub fn phase_at(&self, now: Time) -> LightPhase {
        if self.should_be_on_at(now) {
            LightPhase::LightsOn
        } else {
            LightPhase::LightsOff
        }
    }
}

/// Whether the light should be on at `now`.
///
/// `on < off` is a same-day window `[on, off)`. Otherwise the window wraps
/// past midnight: on from `on` until `off` the next day. `on == off` counts
/// as wrapping, which keeps the light on around the clock.
pub fn should_be_on(now: Time, on: Time, off: Time) -> bool {
    if on < off {
        on <= now && now < off
    } else {
        now >= on || now < off
    }
}

// ===========================================================================
// Tests
// ===========================================================================
