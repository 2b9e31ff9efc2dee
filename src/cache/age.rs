use time::{Duration, OffsetDateTime};

/// Describe how long ago `cached_at` was, relative to `now`.
///
/// Buckets are minutes, hours and days; anything under a minute, including
/// timestamps in the future, reads as `"< 1 minute ago"`.
pub fn format_age(cached_at: OffsetDateTime, now: OffsetDateTime) -> String {
    let elapsed = now - cached_at;
    if elapsed < Duration::MINUTE {
        return "< 1 minute ago".to_string();
    }

    let minutes = elapsed.whole_minutes();
    if minutes < 60 {
        return plural(minutes, "minute");
    }

    let hours = elapsed.whole_hours();
    if hours < 24 {
        return plural(hours, "hour");
    }

    plural(elapsed.whole_days(), "day")
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    const NOW: OffsetDateTime = datetime!(2026-03-10 12:00:00 UTC);

    fn age(elapsed: Duration) -> String {
        format_age(NOW - elapsed, NOW)
    }

    #[test]
    fn buckets() {
        assert_eq!(age(Duration::seconds(0)), "< 1 minute ago");
        assert_eq!(age(Duration::seconds(59)), "< 1 minute ago");
        assert_eq!(age(Duration::seconds(60)), "1 minute ago");
        assert_eq!(age(Duration::seconds(119)), "1 minute ago");
        assert_eq!(age(Duration::minutes(2)), "2 minutes ago");
        assert_eq!(age(Duration::minutes(59)), "59 minutes ago");
        assert_eq!(age(Duration::minutes(60)), "1 hour ago");
        assert_eq!(age(Duration::hours(5)), "5 hours ago");
        assert_eq!(age(Duration::hours(24)), "1 day ago");
        assert_eq!(age(Duration::days(40)), "40 days ago");
    }

    #[test]
    fn future_timestamps_read_as_fresh() {
        assert_eq!(format_age(NOW + Duration::hours(3), NOW), "< 1 minute ago");
    }
}
