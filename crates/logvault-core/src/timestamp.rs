//! Timestamp Pattern Recognition and Formatting
//!
//! This module recognizes the leading timestamp of a log line, parses it into
//! epoch milliseconds, and can later re-render it byte-exactly.
//!
//! ## What is a TimestampPattern?
//!
//! A pair of `(num_spaces_before_ts, format)`. Log frameworks put their
//! timestamp in a fixed column: either at the start of the line or after a
//! fixed number of space-separated fields (`localhost - - [01/Feb/2015:...`).
//! The preamble is located by counting ASCII spaces; the format string then
//! has to consume a contiguous prefix of what follows, otherwise the pattern
//! does not match.
//!
//! ## Format Specifiers
//!
//! Each specifier consumes a fixed-width field from the input:
//!
//! | Spec | Field                               |
//! |------|-------------------------------------|
//! | `%Y` | 4-digit year                        |
//! | `%y` | 2-digit year (69-99 → 1900s)        |
//! | `%m` | month (01-12)                       |
//! | `%B` | full month name                     |
//! | `%b` | abbreviated month name              |
//! | `%d` | zero-padded day                     |
//! | `%e` | space-padded day                    |
//! | `%a` | abbreviated weekday (not validated against the date) |
//! | `%H` | zero-padded 24-hour                 |
//! | `%k` | space-padded 24-hour                |
//! | `%I` | zero-padded 12-hour                 |
//! | `%l` | space-padded 12-hour                |
//! | `%p` | `AM`/`PM`                           |
//! | `%M` | minute                              |
//! | `%S` | second (0-60, admits leap seconds)  |
//! | `%3` | millisecond (exactly 3 digits)      |
//! | `%%` | literal percent                     |
//!
//! ## The Known-Pattern Catalog
//!
//! `known_patterns()` returns the built-in catalog, tried in order by
//! `search_known_patterns`. Catalog order matters: more specific patterns
//! (bracket delimiters, subsecond fields) precede less specific ones, so the
//! order must not be changed. The catalog is built once per process.
//!
//! ## Round Trip
//!
//! For any line whose timestamp a pattern recognizes, removing the matched
//! byte range and later calling `insert_formatted_timestamp` with the parsed
//! epoch value reproduces the original line exactly.

use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sentinel for "this file/message carries no timestamp"
pub const NO_TIMESTAMP: i64 = i64::MIN;

const ABBREV_WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const ABBREV_MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const MS_PER_SECOND: i64 = 1000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Days from the proleptic Gregorian epoch (0001-01-01) to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// A timestamp layout: a fixed number of preamble spaces followed by a format
/// string of the specifiers documented at module level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampPattern {
    num_spaces_before_ts: u8,
    format: String,
}

lazy_static! {
    static ref KNOWN_PATTERNS: Vec<TimestampPattern> = vec![
        // E.g. 2015-01-31T15:50:45.392
        TimestampPattern::new(0, "%Y-%m-%dT%H:%M:%S.%3"),
        // E.g. 2015-01-31T15:50:45,392
        TimestampPattern::new(0, "%Y-%m-%dT%H:%M:%S,%3"),
        // E.g. [2015-01-31T15:50:45
        TimestampPattern::new(0, "[%Y-%m-%dT%H:%M:%S"),
        // E.g. [20170106-16:56:41]
        TimestampPattern::new(0, "[%Y%m%d-%H:%M:%S]"),
        // E.g. 2015-01-31 15:50:45,392
        TimestampPattern::new(0, "%Y-%m-%d %H:%M:%S,%3"),
        // E.g. 2015-01-31 15:50:45.392
        TimestampPattern::new(0, "%Y-%m-%d %H:%M:%S.%3"),
        // E.g. [2015-01-31 15:50:45,085]
        TimestampPattern::new(0, "[%Y-%m-%d %H:%M:%S,%3]"),
        // E.g. 2015-01-31 15:50:45
        TimestampPattern::new(0, "%Y-%m-%d %H:%M:%S"),
        // E.g. Start-Date: 2015-01-31  15:50:45
        TimestampPattern::new(1, "%Y-%m-%d  %H:%M:%S"),
        // E.g. 2015/01/31 15:50:45
        TimestampPattern::new(0, "%Y/%m/%d %H:%M:%S"),
        // E.g. 15/01/31 15:50:45
        TimestampPattern::new(0, "%y/%m/%d %H:%M:%S"),
        // E.g. 150131  9:50:45
        TimestampPattern::new(0, "%y%m%d %k:%M:%S"),
        // E.g. 01 Jan 2016 15:50:17,085
        TimestampPattern::new(0, "%d %b %Y %H:%M:%S,%3"),
        // E.g. Jan 01, 2016 3:50:17 PM
        TimestampPattern::new(0, "%b %d, %Y %l:%M:%S %p"),
        // E.g. January 31, 2015 15:50
        TimestampPattern::new(0, "%B %d, %Y %H:%M"),
        // E.g. E [31/Jan/2015:15:50:45
        TimestampPattern::new(1, "[%d/%b/%Y:%H:%M:%S"),
        // E.g. localhost - - [01/Jan/2016:15:50:17
        // E.g. 192.168.4.5 - - [01/Jan/2016:15:50:17
        TimestampPattern::new(3, "[%d/%b/%Y:%H:%M:%S"),
        // E.g. 192.168.4.5 - - [01/01/2016:15:50:17
        TimestampPattern::new(3, "[%d/%m/%Y:%H:%M:%S"),
        // E.g. INFO [main] 2015-01-31 15:50:45,085
        TimestampPattern::new(2, "%Y-%m-%d %H:%M:%S,%3"),
        // E.g. Started POST "/api/v3/internal/allowed" for 127.0.0.1 at 2017-06-18 00:20:44
        TimestampPattern::new(6, "%Y-%m-%d %H:%M:%S"),
        // E.g. update-alternatives 2015-01-31 15:50:45
        TimestampPattern::new(1, "%Y-%m-%d %H:%M:%S"),
        // E.g. ERROR: apport (pid 4557) Sun Jan  1 15:50:45 2015
        TimestampPattern::new(4, "%a %b %e %H:%M:%S %Y"),
        // E.g. <<<2016-11-10 03:02:29:936
        TimestampPattern::new(0, "<<<%Y-%m-%d %H:%M:%S:%3"),
        // E.g. Jan 21 11:56:42
        TimestampPattern::new(0, "%b %d %H:%M:%S"),
    ];
}

/// The built-in pattern catalog, in match-priority order
pub fn known_patterns() -> &'static [TimestampPattern] {
    &KNOWN_PATTERNS
}

/// Try each catalog pattern in order; return the first that matches along
/// with the parsed epoch milliseconds and the matched byte range.
pub fn search_known_patterns(
    line: &str,
) -> Option<(&'static TimestampPattern, i64, usize, usize)> {
    KNOWN_PATTERNS
        .iter()
        .find_map(|pattern| {
            pattern
                .parse_timestamp(line)
                .map(|(timestamp, begin, end)| (pattern, timestamp, begin, end))
        })
}

/// Converts a padded decimal field (from a larger byte string) to a number.
/// Padding characters are consumed first; every remaining byte must be a
/// digit. A field of nothing but padding parses as 0.
fn parse_padded_number(bytes: &[u8], start: usize, width: usize, pad: u8) -> Option<i64> {
    if start + width > bytes.len() {
        // Too short
        return None;
    }

    let end = start + width;
    let mut ix = start;
    while ix < end && bytes[ix] == pad {
        ix += 1;
    }

    let mut value: i64 = 0;
    for &c in &bytes[ix..end] {
        if !c.is_ascii_digit() {
            return None;
        }
        value = value * 10 + i64::from(c - b'0');
    }
    Some(value)
}

/// Converts a value to a padded string with the given width and appends it
fn append_padded_value(value: i64, padding: char, width: usize, out: &mut String) {
    let rendered = value.to_string();
    for _ in rendered.len()..width {
        out.push(padding);
    }
    out.push_str(&rendered);
}

/// Matches one name out of a table against a byte position; returns the
/// 1-based index and the matched length.
fn match_name(bytes: &[u8], ix: usize, names: &[&str]) -> Option<(usize, usize)> {
    names.iter().enumerate().find_map(|(name_ix, name)| {
        bytes[ix..]
            .starts_with(name.as_bytes())
            .then_some((name_ix + 1, name.len()))
    })
}

impl TimestampPattern {
    pub fn new(num_spaces_before_ts: u8, format: impl Into<String>) -> Self {
        Self {
            num_spaces_before_ts,
            format: format.into(),
        }
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn num_spaces_before_ts(&self) -> u8 {
        self.num_spaces_before_ts
    }

    /// Try to parse this pattern's timestamp out of `line`.
    ///
    /// Returns the epoch milliseconds and the `[begin, end)` byte range the
    /// timestamp (including any literal delimiters in the format) occupies.
    /// `None` means the pattern simply does not match; that is never fatal.
    pub fn parse_timestamp(&self, line: &str) -> Option<(i64, usize, usize)> {
        let bytes = line.as_bytes();
        let line_length = bytes.len();
        let mut line_ix = 0usize;

        // Find beginning of timestamp
        let mut num_spaces_found = 0;
        while num_spaces_found < self.num_spaces_before_ts && line_ix < line_length {
            if bytes[line_ix] == b' ' {
                num_spaces_found += 1;
            }
            line_ix += 1;
        }
        if num_spaces_found < self.num_spaces_before_ts {
            return None;
        }
        let ts_begin_ix = line_ix;

        let mut day = 1i64;
        let mut month = 1i64;
        let mut year = 1970i64;
        let mut hour = 0i64;
        let mut uses_12_hour_clock = false;
        let mut minute = 0i64;
        let mut second = 0i64;
        let mut millisecond = 0i64;
        let mut is_pm = false;

        let fmt = self.format.as_bytes();
        let mut fmt_ix = 0usize;
        while fmt_ix < fmt.len() {
            let spec = if fmt[fmt_ix] == b'%' {
                fmt_ix += 1;
                if fmt_ix >= fmt.len() {
                    return None;
                }
                fmt[fmt_ix]
            } else {
                // Literal byte must match exactly
                if line_ix >= line_length || bytes[line_ix] != fmt[fmt_ix] {
                    return None;
                }
                line_ix += 1;
                fmt_ix += 1;
                continue;
            };
            fmt_ix += 1;

            match spec {
                b'%' => {
                    if line_ix >= line_length || bytes[line_ix] != b'%' {
                        return None;
                    }
                    line_ix += 1;
                }

                b'y' => {
                    // Zero-padded year in century
                    let value = parse_padded_number(bytes, line_ix, 2, b'0')?;
                    if !(0..=99).contains(&value) {
                        return None;
                    }
                    // Year >= 69 treated as 1900s, below 69 treated as 2000s
                    year = if value >= 69 { value + 1900 } else { value + 2000 };
                    line_ix += 2;
                }

                b'Y' => {
                    // Zero-padded year with century
                    let value = parse_padded_number(bytes, line_ix, 4, b'0')?;
                    if !(0..=9999).contains(&value) {
                        return None;
                    }
                    year = value;
                    line_ix += 4;
                }

                b'B' => {
                    let (month_number, length) = match_name(bytes, line_ix, &MONTHS)?;
                    month = month_number as i64;
                    line_ix += length;
                }

                b'b' => {
                    let (month_number, length) = match_name(bytes, line_ix, &ABBREV_MONTHS)?;
                    month = month_number as i64;
                    line_ix += length;
                }

                b'm' => {
                    let value = parse_padded_number(bytes, line_ix, 2, b'0')?;
                    if !(1..=12).contains(&value) {
                        return None;
                    }
                    month = value;
                    line_ix += 2;
                }

                b'd' => {
                    let value = parse_padded_number(bytes, line_ix, 2, b'0')?;
                    if !(1..=31).contains(&value) {
                        return None;
                    }
                    day = value;
                    line_ix += 2;
                }

                b'e' => {
                    // Space-padded day in month
                    let value = parse_padded_number(bytes, line_ix, 2, b' ')?;
                    if !(1..=31).contains(&value) {
                        return None;
                    }
                    day = value;
                    line_ix += 2;
                }

                b'a' => {
                    // Weekday does not contribute to the absolute timestamp,
                    // so it is matched but otherwise ignored
                    let (_, length) = match_name(bytes, line_ix, &ABBREV_WEEKDAYS)?;
                    line_ix += length;
                }

                b'p' => {
                    if bytes[line_ix..].starts_with(b"AM") {
                        is_pm = false;
                    } else if bytes[line_ix..].starts_with(b"PM") {
                        is_pm = true;
                    } else {
                        return None;
                    }
                    line_ix += 2;
                }

                b'H' => {
                    let value = parse_padded_number(bytes, line_ix, 2, b'0')?;
                    if !(0..=23).contains(&value) {
                        return None;
                    }
                    hour = value;
                    line_ix += 2;
                }

                b'k' => {
                    // Space-padded hour on 24-hour clock
                    let value = parse_padded_number(bytes, line_ix, 2, b' ')?;
                    if !(0..=23).contains(&value) {
                        return None;
                    }
                    hour = value;
                    line_ix += 2;
                }

                b'I' => {
                    let value = parse_padded_number(bytes, line_ix, 2, b'0')?;
                    if !(1..=12).contains(&value) {
                        return None;
                    }
                    hour = value;
                    uses_12_hour_clock = true;
                    line_ix += 2;
                }

                b'l' => {
                    // Space-padded hour on 12-hour clock
                    let value = parse_padded_number(bytes, line_ix, 2, b' ')?;
                    if !(1..=12).contains(&value) {
                        return None;
                    }
                    hour = value;
                    uses_12_hour_clock = true;
                    line_ix += 2;
                }

                b'M' => {
                    let value = parse_padded_number(bytes, line_ix, 2, b'0')?;
                    if !(0..=59).contains(&value) {
                        return None;
                    }
                    minute = value;
                    line_ix += 2;
                }

                b'S' => {
                    // 60 admits leap seconds as they appear in log text
                    let value = parse_padded_number(bytes, line_ix, 2, b'0')?;
                    if !(0..=60).contains(&value) {
                        return None;
                    }
                    second = value;
                    line_ix += 2;
                }

                b'3' => {
                    let value = parse_padded_number(bytes, line_ix, 3, b'0')?;
                    if !(0..=999).contains(&value) {
                        return None;
                    }
                    millisecond = value;
                    line_ix += 3;
                }

                _ => return None,
            }
        }

        if uses_12_hour_clock {
            if hour == 12 {
                // 12AM is 0 on the 24-hour clock; 12PM stays 12
                if !is_pm {
                    hour = 0;
                }
            } else if is_pm {
                // All other PM hours shift forward, e.g. 1PM becomes 13
                hour += 12;
            }
        }

        // Calendar validation rejects dates like Feb 30
        let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?;
        let days_since_epoch = i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE;

        // Plain arithmetic so that second == 60 rolls into the next minute
        let timestamp = days_since_epoch * MS_PER_DAY
            + hour * MS_PER_HOUR
            + minute * MS_PER_MINUTE
            + second * MS_PER_SECOND
            + millisecond;

        Some((timestamp, ts_begin_ix, line_ix))
    }

    /// Inverse of `parse_timestamp`: render `timestamp` through this pattern
    /// and splice it into `msg` right after the pattern's preamble spaces.
    ///
    /// Fails with `Error::Failure` if `msg` contains fewer spaces than the
    /// pattern requires, and `Error::Unsupported` on an unknown specifier.
    pub fn insert_formatted_timestamp(&self, timestamp: i64, msg: &str) -> Result<String> {
        let bytes = msg.as_bytes();
        let msg_length = bytes.len();

        // Find where the timestamp should go
        let mut ts_begin_ix = 0usize;
        let mut num_spaces_found = 0;
        while num_spaces_found < self.num_spaces_before_ts && ts_begin_ix < msg_length {
            if bytes[ts_begin_ix] == b' ' {
                num_spaces_found += 1;
            }
            ts_begin_ix += 1;
        }
        if num_spaces_found < self.num_spaces_before_ts {
            tracing::warn!(
                num_spaces_found,
                num_spaces_required = self.num_spaces_before_ts,
                "message has too few spaces for timestamp pattern"
            );
            return Err(Error::Failure(format!(
                "message has {} spaces but pattern requires {}",
                num_spaces_found, self.num_spaces_before_ts
            )));
        }

        let datetime = DateTime::from_timestamp_millis(timestamp).ok_or_else(|| {
            Error::Failure(format!("timestamp {timestamp} out of representable range"))
        })?;
        let year = i64::from(datetime.year());
        let month = datetime.month() as usize;
        let day = i64::from(datetime.day());
        let hour = i64::from(datetime.hour());
        let minute = i64::from(datetime.minute());
        let second = i64::from(datetime.second());
        let millisecond = i64::from(datetime.timestamp_subsec_millis());
        let day_of_week_ix = datetime.weekday().num_days_from_sunday() as usize;

        // 50 is a generous estimate of the rendered timestamp's length
        let mut out = String::with_capacity(msg_length + 50);
        out.push_str(&msg[..ts_begin_ix]);

        let fmt = self.format.as_bytes();
        let mut fmt_ix = 0usize;
        while fmt_ix < fmt.len() {
            if fmt[fmt_ix] != b'%' {
                out.push(fmt[fmt_ix] as char);
                fmt_ix += 1;
                continue;
            }
            fmt_ix += 1;
            let spec = *fmt.get(fmt_ix).ok_or_else(|| {
                Error::Unsupported(format!("dangling '%' in format '{}'", self.format))
            })?;
            fmt_ix += 1;

            match spec {
                b'%' => out.push('%'),

                b'y' => {
                    // Inverse of the parse-side pivot: 2000s map to 00-68,
                    // 1900s map to 69-99
                    let value = if year >= 2000 { year - 2000 } else { year - 1900 };
                    append_padded_value(value, '0', 2, &mut out);
                }

                b'Y' => append_padded_value(year, '0', 4, &mut out),

                b'B' => out.push_str(MONTHS[month - 1]),

                b'b' => out.push_str(ABBREV_MONTHS[month - 1]),

                b'm' => append_padded_value(month as i64, '0', 2, &mut out),

                b'd' => append_padded_value(day, '0', 2, &mut out),

                b'e' => append_padded_value(day, ' ', 2, &mut out),

                b'a' => out.push_str(ABBREV_WEEKDAYS[day_of_week_ix]),

                b'p' => out.push_str(if hour > 11 { "PM" } else { "AM" }),

                b'H' => append_padded_value(hour, '0', 2, &mut out),

                b'k' => append_padded_value(hour, ' ', 2, &mut out),

                b'I' => {
                    let value = match hour {
                        0 => 12,
                        h if h > 12 => h - 12,
                        h => h,
                    };
                    append_padded_value(value, '0', 2, &mut out);
                }

                b'l' => {
                    let value = match hour {
                        0 => 12,
                        h if h > 12 => h - 12,
                        h => h,
                    };
                    append_padded_value(value, ' ', 2, &mut out);
                }

                b'M' => append_padded_value(minute, '0', 2, &mut out),

                b'S' => append_padded_value(second, '0', 2, &mut out),

                b'3' => append_padded_value(millisecond, '0', 3, &mut out),

                other => {
                    return Err(Error::Unsupported(format!(
                        "unknown format specifier '%{}'",
                        other as char
                    )));
                }
            }
        }

        out.push_str(&msg[ts_begin_ix..]);
        Ok(out)
    }
}
