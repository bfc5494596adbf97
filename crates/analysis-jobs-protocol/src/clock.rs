use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// RFC 3339 rendering used for log prefixes, summaries and history columns.
pub fn format_rfc3339(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string())
}

pub fn now_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}
