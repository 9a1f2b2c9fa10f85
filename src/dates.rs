use std::time::Duration;
use time::{
    format_description::FormatItem, macros::format_description, parsing::Parsed, OffsetDateTime,
    PrimitiveDateTime,
};

const DATE_WITH_YEAR: &[FormatItem<'static>] = format_description!(
    "[day padding:none] [month repr:short], [year] @ [hour repr:12 padding:none]:[minute][period case_sensitive:false]"
);
const DATE_WITHOUT_YEAR: &[FormatItem<'static>] = format_description!(
    "[day padding:none] [month repr:short] @ [hour repr:12 padding:none]:[minute][period case_sensitive:false]"
);
const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);
const DISPLAY_DATE: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");

/// Parses a catalog timestamp such as `31 Mar, 2021 @ 6:48AM`. Listings from
/// the current year omit the year (`31 Mar @ 6:48AM`).
pub fn parse_catalog_date(raw: &str) -> Option<PrimitiveDateTime> {
    parse_catalog_date_in(raw, OffsetDateTime::now_utc().year())
}

/// Same as [`parse_catalog_date`] with an explicit year for year-less input.
pub fn parse_catalog_date_in(raw: &str, current_year: i32) -> Option<PrimitiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = PrimitiveDateTime::parse(trimmed, DATE_WITH_YEAR) {
        return Some(dt);
    }

    let mut parsed = Parsed::new();
    let rest = parsed.parse_items(trimmed.as_bytes(), DATE_WITHOUT_YEAR).ok()?;
    if !rest.is_empty() {
        return None;
    }
    parsed.set_year(current_year)?;
    PrimitiveDateTime::try_from(parsed).ok()
}

pub fn format_catalog_date(value: PrimitiveDateTime) -> String {
    value
        .format(DISPLAY_DATE)
        .unwrap_or_else(|_| value.to_string())
}

/// Interprets a `Retry-After` header: either delta seconds or an HTTP date.
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: OffsetDateTime) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = PrimitiveDateTime::parse(trimmed, HTTP_DATE).ok()?.assume_utc();
    Some(Duration::try_from(at - now).unwrap_or(Duration::ZERO))
}
