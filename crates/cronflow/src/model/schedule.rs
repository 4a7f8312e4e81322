//! Cron-schedule parsing and next-run computation.
//!
//! Two grammars are accepted: standard five-field cron (minute resolution)
//! and the `@every <duration>` shortcut with Go-style durations (`30s`,
//! `1m`, `1h30m`, `500ms`).

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub enum CronSpec {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

impl CronSpec {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(Error::InvalidCronSchedule);
        }

        if let Some(dur) = expr.strip_prefix("@every ") {
            let dur = parse_duration(dur.trim()).ok_or(Error::InvalidCronSchedule)?;
            if dur.is_zero() {
                return Err(Error::InvalidCronSchedule);
            }
            return Ok(CronSpec::Every(dur));
        }

        // The cron crate wants a seconds field; five-field input gets a
        // zero-seconds field prepended.
        let normalized = if expr.split_whitespace().count() == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };

        cron::Schedule::from_str(&normalized)
            .map(|s| CronSpec::Cron(Box::new(s)))
            .map_err(|_| Error::InvalidCronSchedule)
    }

    /// The first eligible instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            CronSpec::Cron(schedule) => schedule
                .after(&after)
                .next()
                .ok_or(Error::InvalidCronSchedule),
            CronSpec::Every(dur) => {
                let dur = chrono::Duration::from_std(*dur)
                    .map_err(|_| Error::InvalidCronSchedule)?;
                Ok(after + dur)
            }
        }
    }
}

/// Go-style duration grammar: a sequence of `<number><unit>` terms where
/// unit is one of ms, s, m, h. `parse_duration("1h30m")` == 90 minutes.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                number.push(*c);
                chars.next();
            } else {
                break;
            }
        }
        let value: u64 = number.parse().ok()?;

        let mut unit = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit.push(*c);
                chars.next();
            } else {
                break;
            }
        }

        let term = match unit.as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return None,
        };
        total += term;
    }

    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_every_shortcut() {
        let spec = CronSpec::parse("@every 1m").unwrap();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(spec.next_after(t).unwrap(), t + chrono::Duration::seconds(60));
    }

    #[test]
    fn parse_five_field_cron() {
        let spec = CronSpec::parse("*/5 * * * *").unwrap();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 30).unwrap();
        assert_eq!(
            spec.next_after(t).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap()
        );
    }

    #[test]
    fn next_is_strictly_in_the_future() {
        let spec = CronSpec::parse("* * * * *").unwrap();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(spec.next_after(t).unwrap() > t);
    }

    #[test]
    fn rejects_invalid_expressions() {
        for expr in ["", "not a cron", "@every", "@every fast", "@every 0s", "61 * * * *"] {
            assert!(
                matches!(CronSpec::parse(expr), Err(Error::InvalidCronSchedule)),
                "expected rejection of {expr:?}"
            );
        }
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("m"), None);
        assert_eq!(parse_duration(""), None);
    }
}
