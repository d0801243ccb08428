use std::time::{SystemTime, UNIX_EPOCH};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

const SHORT_ID_LEN: usize = 12;

/// Prefixed short identifier (`res_018f9b2cd4f1`); uuid-v7 so ids sort by
/// creation time.
pub fn prefixed_id(prefix: &str) -> String {
    let hex = Uuid::now_v7().simple().to_string();
    format!("{prefix}_{}", &hex[..SHORT_ID_LEN])
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    let value = OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    value
        .format(&Rfc3339)
        .unwrap_or("1970-01-01T00:00:00Z".to_string())
}

/// ISO calendar date (`2026-08-07`) for the given epoch millisecond instant.
pub fn format_ms_date(epoch_ms: i64) -> String {
    let value = OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let date = value.date();
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_id_carries_prefix_and_length() {
        let id = prefixed_id("res");
        assert!(id.starts_with("res_"));
        assert_eq!(id.len(), "res_".len() + SHORT_ID_LEN);
    }

    #[test]
    fn prefixed_ids_are_unique() {
        assert_ne!(prefixed_id("bk"), prefixed_id("bk"));
    }

    #[test]
    fn format_ms_rfc3339_renders_epoch() {
        assert_eq!(format_ms_rfc3339(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn format_ms_date_renders_calendar_date() {
        assert_eq!(format_ms_date(1_739_750_400_000), "2025-02-17");
    }
}
