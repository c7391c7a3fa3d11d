use chrono::{DateTime, Utc};

use super::mutation::{MutationKind, PendingMutation};

/// Format how long a mutation has been in flight as a short string.
pub fn format_age(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - since).num_seconds().max(0);
    if secs == 0 {
        "new".to_string()
    } else if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

/// Badge shown next to a card with a mutation in flight, e.g. `saving 3s`.
pub fn pending_badge(pending: &PendingMutation, now: DateTime<Utc>) -> String {
    let verb = match pending.kind {
        MutationKind::Create => "creating",
        MutationKind::Update => "saving",
        MutationKind::Delete => "deleting",
    };
    format!("{verb} {}", format_age(pending.since, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_format_age() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();

        assert_eq!(format_age(now, now), "new");
        assert_eq!(format_age(now - Duration::seconds(3), now), "3s");
        assert_eq!(format_age(now - Duration::minutes(2), now), "2m");
        assert_eq!(format_age(now - Duration::hours(1), now), "1h");
        assert_eq!(format_age(now - Duration::days(2), now), "2d");
    }

    #[test]
    fn format_age_boundary_minute() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(format_age(now - Duration::seconds(59), now), "59s");
        assert_eq!(format_age(now - Duration::seconds(60), now), "1m");
    }

    #[test]
    fn format_age_boundary_hour() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(format_age(now - Duration::seconds(3599), now), "59m");
        assert_eq!(format_age(now - Duration::seconds(3600), now), "1h");
    }

    #[test]
    fn format_age_future_date_returns_new() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(format_age(now + Duration::seconds(30), now), "new");
    }

    #[test]
    fn pending_badge_names_kind() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let pending = PendingMutation {
            kind: MutationKind::Delete,
            since: now - Duration::seconds(4),
        };
        assert_eq!(pending_badge(&pending, now), "deleting 4s");
    }
}
