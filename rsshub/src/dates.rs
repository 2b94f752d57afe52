use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

/// A publication date layout understood by [`parse_pub_date`].
#[derive(Debug, Clone, Copy)]
enum DateFormat {
    Rfc2822,
    Rfc3339,
    /// strftime layout carrying a numeric offset (`%z`).
    WithOffset(&'static str),
    /// strftime layout ending in a zone abbreviation, read as UTC.
    ZoneName(&'static str),
}

/// Tried in order; the first layout that parses wins.
const PUB_DATE_FORMATS: &[DateFormat] = &[
    DateFormat::Rfc2822,
    DateFormat::Rfc3339,
    DateFormat::WithOffset("%a, %d %b %Y %H:%M:%S %z"),
    DateFormat::WithOffset("%a, %e %b %Y %H:%M:%S %z"),
    DateFormat::WithOffset("%d %b %y %H:%M %z"),
    DateFormat::ZoneName("%a, %d %b %Y %H:%M:%S %Z"),
    DateFormat::ZoneName("%d %b %y %H:%M %Z"),
];

impl DateFormat {
    fn parse(self, input: &str) -> Option<DateTime<Utc>> {
        match self {
            DateFormat::Rfc2822 => DateTime::parse_from_rfc2822(input)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            DateFormat::Rfc3339 => DateTime::parse_from_rfc3339(input)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            DateFormat::WithOffset(layout) => DateTime::parse_from_str(input, layout)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            DateFormat::ZoneName(layout) => NaiveDateTime::parse_from_str(input, layout)
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive)),
        }
    }
}

/// Parse a feed item's publication date against the known layouts.
pub fn parse_pub_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    PUB_DATE_FORMATS.iter().find_map(|format| format.parse(input))
}

/// Publication time for an item: the parsed date, or "now" when the date is
/// missing or matches no known layout.
pub fn published_at(raw: Option<&str>) -> DateTime<Utc> {
    match raw {
        Some(raw) => parse_pub_date(raw).unwrap_or_else(|| {
            debug!("Unrecognised publication date {:?}, using current time", raw);
            Utc::now()
        }),
        None => Utc::now(),
    }
}
