//! The subset of the `opening_hours` syntax used by parking time restrictions.
//!
//! Supported: `24/7`, weekday lists and ranges (`Mo-Fr`, `Mo,We,Fr`, `Sa-Mo`), month lists and
//! ranges (`Apr-Oct`), time lists (`08:00-12:00,14:00-18:00`, `18:00-06:00` wraps past
//! midnight, `24:00` ends a day), `off` rules, rules separated by `;` or `, `, and absolute date
//! ranges (`2026 Mar 01-2026 Apr 30`). Anything else is rejected with a reason.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use serde::Serialize;

const MINUTES_PER_DAY: u16 = 24 * 60;
const ALL_DAYS: u8 = 0b111_1111;
const WEEKDAYS: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeSpan {
    Always,
    Recurring(Schedule),
    Absolute(DateRange),
}

impl TimeSpan {
    pub fn parse(expression: &str) -> Result<TimeSpan, String> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err("empty time expression".to_string());
        }
        if let Some(range) = DateRange::parse(expression)? {
            return Ok(TimeSpan::Absolute(range));
        }
        Ok(TimeSpan::Recurring(Schedule::parse(expression)?))
    }

    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        match self {
            TimeSpan::Always => true,
            TimeSpan::Recurring(schedule) => schedule.contains(instant),
            TimeSpan::Absolute(range) => range.contains(instant),
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, TimeSpan::Always)
    }
}

/// `[from, to)` in local time.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DateRange {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl DateRange {
    fn parse(expression: &str) -> Result<Option<DateRange>, String> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^(?<y1>\d{4}) (?<m1>[A-Z][a-z]{2}) (?<d1>\d{1,2})\s*-\s*(?<y2>\d{4}) (?<m2>[A-Z][a-z]{2}) (?<d2>\d{1,2})$")
                .expect("date range regex")
        });
        let Some(caps) = re.captures(expression) else {
            return Ok(None);
        };
        let date = |y: &str, m: &str, d: &str| -> Result<NaiveDate, String> {
            let year = y.parse::<i32>().map_err(|e| e.to_string())?;
            let month = month_index(m).ok_or_else(|| format!("unknown month `{}`", m))? + 1;
            let day = d.parse::<u32>().map_err(|e| e.to_string())?;
            NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| format!("invalid date {} {} {}", y, m, d))
        };
        let from = date(&caps["y1"], &caps["m1"], &caps["d1"])?;
        let to = date(&caps["y2"], &caps["m2"], &caps["d2"])?;
        if to < from {
            return Err(format!("date range ends before it starts: {}", expression));
        }
        Ok(Some(DateRange {
            from: from.and_hms_opt(0, 0, 0).ok_or("invalid start")?,
            to: (to + Duration::days(1)).and_hms_opt(0, 0, 0).ok_or("invalid end")?,
        }))
    }

    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        self.from <= instant && instant < self.to
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Schedule {
    pub source: String,
    pub rules: Vec<ScheduleRule>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScheduleRule {
    /// Inclusive month ranges, 1-based. Empty means every month.
    pub months: Vec<(u32, u32)>,
    /// Bit 0 is Monday.
    pub weekdays: u8,
    /// Minute-of-day ranges. Empty means the whole day.
    pub times: Vec<(u16, u16)>,
    pub off: bool,
}

impl Schedule {
    fn parse(expression: &str) -> Result<Schedule, String> {
        static RULE_SEPARATOR: OnceLock<Regex> = OnceLock::new();
        let separator = RULE_SEPARATOR.get_or_init(|| Regex::new(r";|,\s+").expect("separator regex"));

        let mut rules: Vec<ScheduleRule> = Vec::new();
        for part in separator.split(expression) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let rule = ScheduleRule::parse(part)?;
            // "Mo-Fr 08:00-12:00, 14:00-18:00": a bare time list continues the previous rule.
            let continues_previous = rule.months.is_empty()
                && rule.weekdays == ALL_DAYS
                && !rule.times.is_empty()
                && !rule.off
                && !part.contains(char::is_alphabetic);
            match rules.last_mut() {
                Some(previous) if continues_previous && !previous.off => previous.times.extend(rule.times),
                _ => rules.push(rule),
            }
        }
        if rules.is_empty() {
            return Err(format!("no rules in `{}`", expression));
        }
        Ok(Schedule { source: expression.to_string(), rules })
    }

    /// Open if any regular rule matches and no `off` rule does.
    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        let mut open = false;
        for rule in &self.rules {
            if rule.matches(instant) {
                if rule.off {
                    return false;
                }
                open = true;
            }
        }
        open
    }
}

impl ScheduleRule {
    fn parse(part: &str) -> Result<ScheduleRule, String> {
        static TIMES: OnceLock<Regex> = OnceLock::new();
        let times_re = TIMES.get_or_init(|| {
            Regex::new(r"^\d{1,2}:\d{2}-\d{1,2}:\d{2}(,\d{1,2}:\d{2}-\d{1,2}:\d{2})*$").expect("times regex")
        });

        let mut rule = ScheduleRule { months: Vec::new(), weekdays: 0, times: Vec::new(), off: false };
        for token in part.split_whitespace() {
            if token == "24/7" {
                rule.weekdays = ALL_DAYS;
            } else if token == "off" || token == "closed" {
                rule.off = true;
            } else if times_re.is_match(token) {
                for range in token.split(',') {
                    rule.times.push(parse_time_range(range)?);
                }
            } else if let Some(days) = parse_weekdays(token)? {
                rule.weekdays |= days;
            } else if let Some(months) = parse_months(token)? {
                rule.months.extend(months);
            } else {
                return Err(format!("unsupported token `{}`", token));
            }
        }
        if rule.weekdays == 0 {
            rule.weekdays = ALL_DAYS;
        }
        Ok(rule)
    }

    fn month_matches(&self, month: u32) -> bool {
        self.months.is_empty()
            || self.months.iter().any(|&(from, to)| {
                if from <= to {
                    from <= month && month <= to
                } else {
                    month >= from || month <= to
                }
            })
    }

    fn day_matches(&self, weekday: u32) -> bool {
        self.weekdays & (1 << weekday) != 0
    }

    fn matches(&self, instant: NaiveDateTime) -> bool {
        if !self.month_matches(instant.month()) {
            return false;
        }
        let today = instant.weekday().num_days_from_monday();
        let yesterday = (today + 6) % 7;
        if self.times.is_empty() {
            return self.day_matches(today);
        }
        let minute = (instant.hour() * 60 + instant.minute()) as u16;
        self.times.iter().any(|&(start, end)| {
            if start < end {
                self.day_matches(today) && start <= minute && minute < end
            } else {
                (self.day_matches(today) && minute >= start)
                    || (self.day_matches(yesterday) && minute < end)
            }
        })
    }
}

fn month_index(name: &str) -> Option<u32> {
    MONTHS.iter().position(|m| *m == name).map(|i| i as u32)
}

fn weekday_index(name: &str) -> Option<u32> {
    WEEKDAYS.iter().position(|d| *d == name).map(|i| i as u32)
}

fn parse_minute(value: &str) -> Result<u16, String> {
    let (h, m) = value.split_once(':').ok_or_else(|| format!("bad time `{}`", value))?;
    let h: u16 = h.parse().map_err(|_| format!("bad hour in `{}`", value))?;
    let m: u16 = m.parse().map_err(|_| format!("bad minute in `{}`", value))?;
    let minute = h * 60 + m;
    if m >= 60 || minute > MINUTES_PER_DAY {
        return Err(format!("time out of range `{}`", value));
    }
    Ok(minute)
}

fn parse_time_range(range: &str) -> Result<(u16, u16), String> {
    let (start, end) = range.split_once('-').ok_or_else(|| format!("bad time range `{}`", range))?;
    let start = parse_minute(start)?;
    let end = parse_minute(end)?;
    if start == end || start == MINUTES_PER_DAY {
        return Err(format!("empty time range `{}`", range));
    }
    Ok((start, end))
}

/// `None` when the token isn't a weekday selector at all.
fn parse_weekdays(token: &str) -> Result<Option<u8>, String> {
    let mut mask = 0u8;
    for item in token.split(',') {
        let (from, to) = item.split_once('-').unwrap_or((item, item));
        let (Some(from), Some(to)) = (weekday_index(from), weekday_index(to)) else {
            return if mask == 0 { Ok(None) } else { Err(format!("bad weekday list `{}`", token)) };
        };
        let mut day = from;
        loop {
            mask |= 1 << day;
            if day == to {
                break;
            }
            day = (day + 1) % 7;
        }
    }
    Ok(Some(mask))
}

fn parse_months(token: &str) -> Result<Option<Vec<(u32, u32)>>, String> {
    let mut ranges = Vec::new();
    for item in token.split(',') {
        let (from, to) = item.split_once('-').unwrap_or((item, item));
        let (Some(from), Some(to)) = (month_index(from), month_index(to)) else {
            return if ranges.is_empty() { Ok(None) } else { Err(format!("bad month list `{}`", token)) };
        };
        ranges.push((from + 1, to + 1));
    }
    Ok(Some(ranges))
}
