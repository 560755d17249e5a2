//! Parsing of `60s` / `1m30s` / `500ms` style durations.

use std::time::Duration;

use crate::{AgentError, AgentResult};

/// Parses a strictly positive duration made of `<number><unit>` terms.
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. Fractions are allowed.
pub fn parse_duration(input: &str) -> AgentResult<Duration> {
    let s = input.trim();
    let bad = |why: &str| AgentError::BadArgument(format!("invalid duration {input:?}: {why}"));
    if s.is_empty() {
        return Err(bad("empty"));
    }
    if s.starts_with('-') {
        return Err(bad("must be positive"));
    }
    let mut rest = s.strip_prefix('+').unwrap_or(s);
    if rest == "0" {
        return Err(bad("must be positive"));
    }

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(bad("expected a number"));
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| bad("bad number"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(bad("missing unit")),
            other => return Err(bad(&format!("unknown unit {other:?}"))),
        };
        rest = &rest[unit_len..];
        total_nanos += value * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(bad("out of range"));
    }
    let d = Duration::from_nanos(total_nanos.round() as u64);
    if d.is_zero() {
        return Err(bad("must be positive"));
    }
    Ok(d)
}

/// Whole seconds handed to external tools; never below one.
pub fn whole_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

/// Number of profiling windows that fit in `duration`.
pub fn iterations(duration: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let n = duration.as_nanos() / interval.as_nanos();
    u32::try_from(n).unwrap_or(u32::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_forms() {
        assert_eq!(parse_duration("60s").expect("60s"), Duration::from_secs(60));
        assert_eq!(parse_duration("1m30s").expect("1m30s"), Duration::from_secs(90));
        assert_eq!(parse_duration("500ms").expect("ms"), Duration::from_millis(500));
        assert_eq!(parse_duration("2h").expect("h"), Duration::from_secs(7200));
        assert_eq!(parse_duration("1.5s").expect("frac"), Duration::from_millis(1500));
        assert_eq!(parse_duration(" 5m ").expect("trim"), Duration::from_secs(300));
    }

    #[test]
    fn rejects_zero_negative_and_garbage() {
        for input in ["", "0", "0s", "-5s", "abc", "10", "5d", "s"] {
            let err = parse_duration(input).expect_err(input);
            assert!(matches!(err, AgentError::BadArgument(_)), "{input}");
        }
    }

    #[test]
    fn iteration_count_is_floored() {
        let s = Duration::from_secs;
        assert_eq!(iterations(s(60), s(60)), 1);
        assert_eq!(iterations(s(2), s(1)), 2);
        assert_eq!(iterations(s(10), s(3)), 3);
    }

    #[test]
    fn whole_secs_rounds_up() {
        assert_eq!(whole_secs(Duration::from_millis(1500)), 2);
        assert_eq!(whole_secs(Duration::from_millis(10)), 1);
        assert_eq!(whole_secs(Duration::from_secs(30)), 30);
    }
}
