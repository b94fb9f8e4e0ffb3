use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Account and sign-in payloads.
pub mod account;
/// Health check payloads.
pub mod health;
/// Progress and recent-list payloads.
pub mod progress;
/// Preference payloads.
pub mod settings;
/// Server-sent event payloads.
pub mod sse;
/// Reconcile and pending-write payloads.
pub mod sync;
pub mod validation;

/// Render an epoch-millisecond client timestamp as RFC 3339.
fn format_epoch_millis(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_millis_render_as_rfc3339() {
        assert_eq!(format_epoch_millis(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_epoch_millis(i64::MAX), "invalid-timestamp");
    }
}
