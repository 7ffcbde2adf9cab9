//! Interval text in one canonical shape.
//!
//! Oracle renders `INTERVAL YEAR TO MONTH` as `+01-02` and
//! `INTERVAL DAY TO SECOND` as `+01 02:03:04.000000`; PostgreSQL (with
//! `intervalstyle = postgres`) renders the same values as `1 year 2 mons`
//! and `1 day 02:03:04`. Both are reduced to PostgreSQL's own fields
//! (months, days, microseconds) and printed as
//! `N mons N days [-]HH:MM:SS.ffffff`, which PostgreSQL accepts as input.

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Interval {
    months: i64,
    days: i64,
    micros: i64,
}

impl Interval {
    fn render(&self) -> String {
        let sign = if self.micros < 0 { "-" } else { "" };
        let micros = self.micros.unsigned_abs();
        let hours = micros / MICROS_PER_HOUR as u64;
        let minutes = micros % MICROS_PER_HOUR as u64 / MICROS_PER_MINUTE as u64;
        let seconds = micros % MICROS_PER_MINUTE as u64 / MICROS_PER_SECOND as u64;
        let fraction = micros % MICROS_PER_SECOND as u64;
        format!(
            "{} mons {} days {}{:02}:{:02}:{:02}.{:06}",
            self.months, self.days, sign, hours, minutes, seconds, fraction
        )
    }
}

/// Canonical text for an Oracle or PostgreSQL interval, `None` when `s` is
/// neither.
pub fn canonical_interval(s: &str) -> Option<String> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    let interval = match tokens.as_slice() {
        [] => return None,
        [single] if !single.contains(':') => parse_year_month(single)?,
        [day, time] if time.contains(':') && day.parse::<i64>().is_ok() => parse_day_second(day, time)?,
        _ => parse_postgres(&tokens)?,
    };
    Some(interval.render())
}

/// `+YY-MM`
fn parse_year_month(token: &str) -> Option<Interval> {
    let (negative, unsigned) = split_sign(token);
    let (years, months) = unsigned.split_once('-')?;
    let total = years.parse::<i64>().ok()?.checked_mul(12)?.checked_add(months.parse::<i64>().ok()?)?;
    Some(Interval {
        months: if negative { -total } else { total },
        ..Interval::default()
    })
}

/// `+DD HH:MM:SS.fffffffff`; the sign covers the time part too.
fn parse_day_second(day: &str, time: &str) -> Option<Interval> {
    let (negative, unsigned) = split_sign(day);
    let days = unsigned.parse::<i64>().ok()?;
    let micros = parse_time(time)?;
    if micros < 0 {
        return None;
    }
    let sign = if negative { -1 } else { 1 };
    Some(Interval {
        months: 0,
        days: sign * days,
        micros: sign * micros,
    })
}

/// PostgreSQL `postgres` style: `1 year 2 mons -3 days +04:05:06.5`, each
/// field signed on its own.
fn parse_postgres(tokens: &[&str]) -> Option<Interval> {
    let mut interval = Interval::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if token.contains(':') {
            interval.micros = interval.micros.checked_add(parse_time(token)?)?;
            i += 1;
            continue;
        }
        let n = token.parse::<i64>().ok()?;
        let unit = tokens.get(i + 1)?.to_ascii_lowercase();
        match unit.trim_end_matches('s') {
            "year" => interval.months = interval.months.checked_add(n.checked_mul(12)?)?,
            "mon" | "month" => interval.months = interval.months.checked_add(n)?,
            "day" => interval.days = interval.days.checked_add(n)?,
            "hour" => interval.micros = interval.micros.checked_add(n.checked_mul(MICROS_PER_HOUR)?)?,
            "min" | "minute" => interval.micros = interval.micros.checked_add(n.checked_mul(MICROS_PER_MINUTE)?)?,
            "sec" | "second" => interval.micros = interval.micros.checked_add(n.checked_mul(MICROS_PER_SECOND)?)?,
            _ => return None,
        }
        i += 2;
    }
    Some(interval)
}

/// `[-+]HH:MM[:SS[.f]]` in microseconds, rounded to the nearest microsecond.
fn parse_time(token: &str) -> Option<i64> {
    let (negative, unsigned) = split_sign(token);
    let mut parts = unsigned.split(':');
    let hours = parts.next()?.parse::<i64>().ok()?;
    let minutes = parts.next()?.parse::<i64>().ok()?;
    let (seconds, fraction) = match parts.next() {
        Some(sec) => sec.split_once('.').unwrap_or((sec, "")),
        None => ("0", ""),
    };
    if parts.next().is_some() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let seconds = seconds.parse::<i64>().ok()?;

    let mut fraction_micros = 0;
    for (i, b) in fraction.bytes().take(6).enumerate() {
        fraction_micros += i64::from(b - b'0') * 10_i64.pow(5 - i as u32);
    }
    if fraction.as_bytes().get(6).map_or(false, |b| *b >= b'5') {
        fraction_micros += 1;
    }

    let micros = hours
        .checked_mul(MICROS_PER_HOUR)?
        .checked_add(minutes.checked_mul(MICROS_PER_MINUTE)?)?
        .checked_add(seconds.checked_mul(MICROS_PER_SECOND)?)?
        .checked_add(fraction_micros)?;
    Some(if negative { -micros } else { micros })
}

fn split_sign(token: &str) -> (bool, &str) {
    match token.as_bytes().first() {
        Some(b'-') => (true, &token[1..]),
        Some(b'+') => (false, &token[1..]),
        _ => (false, token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(s: &str) -> String {
        canonical_interval(s).unwrap()
    }

    #[test]
    fn test_day_to_second_matches_postgres() {
        assert_eq!(canonical("+01 02:03:04.000000"), canonical("1 day 02:03:04"));
        assert_eq!(canonical("+00 00:00:01.500000000"), canonical("00:00:01.5"));
        assert_eq!(canonical("+000000003 00:00:00.000000000"), canonical("3 days"));
    }

    #[test]
    fn test_negative_day_to_second() {
        assert_eq!(canonical("-01 02:00:00.000000"), "0 mons -1 days -02:00:00.000000");
        assert_eq!(canonical("-01 02:00:00.000000"), canonical("-1 days -02:00:00"));
        assert_eq!(canonical("-00 00:30:00.000000"), canonical("-00:30:00"));
    }

    #[test]
    fn test_year_to_month_matches_postgres() {
        assert_eq!(canonical("+01-02"), canonical("1 year 2 mons"));
        assert_eq!(canonical("+02-00"), canonical("2 years"));
        assert_eq!(canonical("-01-06"), "-18 mons 0 days 00:00:00.000000");
        assert_eq!(canonical("-01-06"), canonical("-1 years -6 mons"));
    }

    #[test]
    fn test_mixed_signs_kept_per_field() {
        assert_eq!(canonical("1 mon -2 days +03:00:00"), "1 mons -2 days 03:00:00.000000");
    }

    #[test]
    fn test_fraction_rounds_to_micros() {
        assert_eq!(canonical("+00 00:00:00.123456789"), "0 mons 0 days 00:00:00.123457");
    }

    #[test]
    fn test_canonical_form_is_stable() {
        for s in ["+01 02:03:04.5", "-03-04", "4 years 1 day -00:00:07", "00:00:00"] {
            let once = canonical(s);
            assert_eq!(canonical(&once), once);
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(canonical_interval("").is_none());
        assert!(canonical_interval("soon").is_none());
        assert!(canonical_interval("3 fortnights").is_none());
        assert!(canonical_interval("1 day 02:xx:00").is_none());
    }
}
