//! Trusted Time
//!
//! Certificate validity windows are checked against a time the platform
//! vouches for. Firmware clocks are frequently wrong or unset before an OS has
//! run, so the source is a trait and "no trusted time" is a valid answer.

use static_assertions::assert_eq_size;

// =============================================================================
// TIME SOURCE
// =============================================================================

/// Provider of trusted wall-clock time
pub trait TimeSource {
    /// Seconds since 1970-01-01 00:00:00 UTC, or `None` when not trustworthy
    fn now(&self) -> Option<i64>;
}

/// A source that never has trusted time
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrustedTime;

impl TimeSource for NoTrustedTime {
    fn now(&self) -> Option<i64> {
        None
    }
}

/// A fixed instant, e.g. one measured and sealed by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedTime(pub i64);

impl TimeSource for FixedTime {
    fn now(&self) -> Option<i64> {
        Some(self.0)
    }
}

impl TimeSource for EfiTime {
    fn now(&self) -> Option<i64> {
        self.to_unix()
    }
}

// =============================================================================
// EFI TIME
// =============================================================================

/// UEFI Time structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EfiTime {
    /// Year (1900-9999)
    pub year: u16,
    /// Month (1-12)
    pub month: u8,
    /// Day (1-31)
    pub day: u8,
    /// Hour (0-23)
    pub hour: u8,
    /// Minute (0-59)
    pub minute: u8,
    /// Second (0-59)
    pub second: u8,
    /// Padding
    pub pad1: u8,
    /// Nanosecond (0-999999999)
    pub nanosecond: u32,
    /// Timezone in minutes (-1440 to 1440 or 2047 for unspecified)
    pub timezone: i16,
    /// Daylight saving time
    pub daylight: u8,
    /// Padding
    pub pad2: u8,
}

assert_eq_size!(EfiTime, [u8; 16]);

impl EfiTime {
    /// Unspecified timezone
    pub const TIMEZONE_UNSPECIFIED: i16 = 2047;

    /// Create new time in an unspecified timezone
    pub const fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            pad1: 0,
            nanosecond: 0,
            timezone: Self::TIMEZONE_UNSPECIFIED,
            daylight: 0,
            pad2: 0,
        }
    }

    /// Validate time
    pub fn is_valid(&self) -> bool {
        (1900..=9999).contains(&self.year)
            && (1..=12).contains(&self.month)
            && self.day >= 1
            && self.day <= days_in_month(self.year, self.month)
            && self.hour <= 23
            && self.minute <= 59
            && self.second <= 59
            && self.nanosecond <= 999_999_999
            && (self.timezone == Self::TIMEZONE_UNSPECIFIED
                || (-1440..=1440).contains(&self.timezone))
    }

    /// Convert to Unix seconds, `None` if the fields are invalid
    ///
    /// An unspecified timezone is taken as UTC.
    pub fn to_unix(&self) -> Option<i64> {
        if !self.is_valid() {
            return None;
        }
        let local = civil_to_unix(
            i64::from(self.year),
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        )?;
        if self.timezone == Self::TIMEZONE_UNSPECIFIED {
            Some(local)
        } else {
            Some(local - i64::from(self.timezone) * 60)
        }
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Is leap year
pub const fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// Days in month
pub const fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => if is_leap_year(year) { 29 } else { 28 },
        _ => 0,
    }
}

/// Days since 1970-01-01 for a proleptic Gregorian date
fn days_from_civil(year: i64, month: u8, day: u8) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let m = i64::from(month);
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Convert a UTC calendar time to Unix seconds, validating every field
pub fn civil_to_unix(
    year: i64,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
) -> Option<i64> {
    let year_u16 = u16::try_from(year).ok()?;
    if !(1..=12).contains(&month)
        || day == 0
        || day > days_in_month(year_u16, month)
        || hour > 23
        || minute > 59
        || second > 59
    {
        return None;
    }
    Some(
        days_from_civil(year, month, day) * 86_400
            + i64::from(hour) * 3600
            + i64::from(minute) * 60
            + i64::from(second),
    )
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_timestamp() {
        assert_eq!(EfiTime::new(1970, 1, 1, 0, 0, 0).to_unix(), Some(0));
        assert_eq!(EfiTime::new(2000, 3, 1, 0, 0, 0).to_unix(), Some(951_868_800));
        assert_eq!(EfiTime::new(2024, 2, 29, 12, 0, 0).to_unix(), Some(1_709_208_000));
        assert_eq!(civil_to_unix(1950, 1, 1, 0, 0, 0), Some(-631_152_000));
    }

    #[test]
    fn test_timezone_adjust() {
        let mut time = EfiTime::new(2024, 1, 1, 1, 0, 0);
        time.timezone = 60;
        assert_eq!(time.to_unix(), EfiTime::new(2024, 1, 1, 0, 0, 0).to_unix());
    }

    #[test]
    fn test_invalid_time() {
        assert_eq!(EfiTime::new(2023, 2, 29, 0, 0, 0).to_unix(), None);
        assert_eq!(EfiTime::new(2024, 6, 31, 0, 0, 0).to_unix(), None);
        assert_eq!(EfiTime::default().to_unix(), None);
        assert_eq!(civil_to_unix(2024, 1, 1, 24, 0, 0), None);
    }

    #[test]
    fn test_sources() {
        assert_eq!(NoTrustedTime.now(), None);
        assert_eq!(FixedTime(42).now(), Some(42));
        assert_eq!(EfiTime::new(1970, 1, 2, 0, 0, 0).now(), Some(86_400));
    }
}
