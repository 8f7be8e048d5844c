use bstr::{BStr, BString, ByteSlice, ByteVec};
use chrono::{Local, Offset};

use crate::error::UtilError;
use crate::Result;

/// A git date: seconds since the epoch plus the author's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GitDate {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Timezone offset in minutes from UTC (e.g. -300 for EST).
    pub tz_offset: i32,
}

/// Convert the git decimal timezone form (-0500) to minutes (-300).
fn tz_offset_to_minutes(tz: i32) -> i32 {
    let sign = if tz < 0 { -1 } else { 1 };
    let abs = tz.unsigned_abs() as i32;
    sign * ((abs / 100) * 60 + abs % 100)
}

/// Convert minutes back to the git decimal form.
fn minutes_to_tz_offset(minutes: i32) -> i32 {
    let sign = if minutes < 0 { -1 } else { 1 };
    let abs = minutes.unsigned_abs() as i32;
    sign * ((abs / 60) * 100 + abs % 60)
}

impl GitDate {
    /// Create from a Unix timestamp and timezone offset in minutes.
    pub fn new(timestamp: i64, tz_offset_minutes: i32) -> Self {
        Self {
            timestamp,
            tz_offset: tz_offset_minutes,
        }
    }

    /// The current time with the local timezone.
    pub fn now() -> Self {
        let now = Local::now();
        let offset_secs = now.offset().fix().local_minus_utc();
        Self {
            timestamp: now.timestamp(),
            tz_offset: offset_secs / 60,
        }
    }

    /// Parse the raw git format: `"<timestamp> <+/-HHMM>"` (offset optional).
    pub fn parse_raw(input: &str) -> Result<Self> {
        let input = input.trim();
        let mut parts = input.splitn(2, ' ');

        let ts_str = parts.next().unwrap_or("");
        let timestamp: i64 = ts_str
            .parse()
            .map_err(|_| UtilError::DateParse(format!("invalid timestamp: '{}'", ts_str)))?;

        let tz_offset = match parts.next() {
            Some(tz_str) => {
                let tz_str = tz_str.trim();
                let tz_int: i32 = tz_str.parse().map_err(|_| {
                    UtilError::DateParse(format!("invalid timezone: '{}'", tz_str))
                })?;
                tz_offset_to_minutes(tz_int)
            }
            None => 0,
        };

        Ok(Self {
            timestamp,
            tz_offset,
        })
    }

    /// Format in the raw git form: `"<timestamp> <+/-HHMM>"`.
    pub fn format_raw(&self) -> String {
        format!(
            "{} {:+05}",
            self.timestamp,
            minutes_to_tz_offset(self.tz_offset)
        )
    }
}

/// An identity: name, email, and timestamp, as it appears in commit and
/// tag headers and in reflog lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: BString,
    pub email: BString,
    pub date: GitDate,
}

impl Signature {
    /// Parse from git format: `Name <email> timestamp tz`.
    pub fn parse(input: &BStr) -> Result<Self> {
        let input = input.as_bytes();

        let gt_pos = input
            .iter()
            .rposition(|&b| b == b'>')
            .ok_or_else(|| UtilError::Signature("missing '>' in signature".into()))?;
        let lt_pos = input[..gt_pos]
            .iter()
            .rposition(|&b| b == b'<')
            .ok_or_else(|| UtilError::Signature("missing '<' in signature".into()))?;

        let name = input[..lt_pos].trim();
        let email = &input[lt_pos + 1..gt_pos];

        let date_str = input[gt_pos + 1..].trim();
        let date_str = std::str::from_utf8(date_str)
            .map_err(|_| UtilError::Signature("non-UTF-8 date in signature".into()))?;
        let date = GitDate::parse_raw(date_str)?;

        Ok(Self {
            name: BString::from(name),
            email: BString::from(email),
            date,
        })
    }

    /// Format in git's canonical form: `Name <email> timestamp tz`.
    pub fn to_bytes(&self) -> BString {
        let mut out = BString::new(Vec::with_capacity(
            self.name.len() + self.email.len() + 24,
        ));
        out.push_str(&self.name);
        out.push_str(b" <");
        out.push_str(&self.email);
        out.push_str(b"> ");
        out.push_str(self.date.format_raw().as_bytes());
        out
    }
}
