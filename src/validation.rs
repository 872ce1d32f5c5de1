//! Request field validation shared by the key management and wallet routes.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde_json::Value;

fn iso_8601() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}(T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2}))?$").unwrap()
    })
}

/// Validate an optional `expires_at` request field.
///
/// Absent or `null` means "never expires". A date-only value stays valid
/// through the last millisecond of that day (UTC). The error string is the
/// client-facing message.
pub fn validate_expires_at(
    value: Option<&Value>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, String> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err("Field 'expires_at' must be a string".to_string()),
    };

    let invalid = || "Field 'expires_at' must be a valid ISO 8601 date".to_string();
    if !iso_8601().is_match(raw) {
        return Err(invalid());
    }

    let expires_at = if raw.len() == 10 {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?;
        let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).ok_or_else(invalid)?;
        date.and_time(end_of_day).and_utc()
    } else {
        DateTime::parse_from_rfc3339(raw)
            .map_err(|_| invalid())?
            .with_timezone(&Utc)
    };

    if expires_at <= now {
        return Err("Field 'expires_at' must be a future date".to_string());
    }
    Ok(Some(expires_at))
}
