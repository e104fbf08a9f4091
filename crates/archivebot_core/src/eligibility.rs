use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::template::MarkerHit;

/// Formats the liberal date parser accepts. `%B` also matches abbreviated
/// month names during parsing, so "Jan 1, 2023" decodes via the first entry.
const DATE_FORMATS: [&str; 6] = [
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %B, %Y",
    "%Y-%m-%d",
    "%m/%d/%Y",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    NotEligible,
}

/// Decides whether any flagged marker is old enough to archive.
///
/// A page qualifies when at least one marker date lies strictly before
/// `today - min_age_days`. Unparsable dates never fail the run; they only
/// disqualify their own marker.
pub fn evaluate(hits: &[MarkerHit], today: NaiveDate, min_age_days: i64) -> Eligibility {
    let cutoff = today - Duration::days(min_age_days);
    for hit in hits {
        match recommendation_date(&hit.args) {
            Some(date) if date < cutoff => return Eligibility::Eligible,
            Some(date) => {
                debug!("marker date {date} is within the {min_age_days}-day retention window");
            }
            None => {
                warn!("marker has no parsable date, treating as not eligible: {}", hit.args);
            }
        }
    }
    Eligibility::NotEligible
}

/// Pulls the `date=` field out of a raw argument fragment and parses it.
pub fn recommendation_date(args: &str) -> Option<NaiveDate> {
    parse_human_date(date_field(args)?)
}

/// Finds the `date=` field in a `key=value` argument fragment. The key
/// match ignores ASCII case; the value may be bare or quoted.
pub fn date_field(args: &str) -> Option<&str> {
    for part in args.split('|') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("date") {
            return Some(value.trim().trim_matches(|c| c == '"' || c == '\''));
        }
    }
    None
}

pub fn parse_human_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}
