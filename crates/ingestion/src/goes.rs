//! Locations of the GOES XRS 1-minute average archive.

use chrono::{DateTime, Datelike, Utc};
use std::ops::RangeInclusive;

use timelines_common::time::{first_day_of_month, from_epoch_millis, last_day_of_month};
use timelines_common::TimelinesResult;

/// Monthly CSV location. Placeholders: `{year}`, `{month}`, `{nr}`,
/// `{first_day}`, `{last_day}`.
pub const NEW_AVG_URL_TEMPLATE: &str = "https://satdat.ngdc.noaa.gov/sem/goes/data/new_avg/{year}/{month}/goes{nr}/csv/g{nr}_xrs_1m_{first_day}_{last_day}.csv";

/// Satellite numbers tried for every month, in order.
pub const SATELLITES: RangeInclusive<u32> = 0..=20;

/// First sample of the averaged archive (1996-08-13T20:35:16Z).
pub const NEW_AVG_START_MS: i64 = 839_961_316_000;

/// Last sample of the averaged archive (2001-02-28T22:59:58Z).
pub const NEW_AVG_END_MS: i64 = 983_401_198_000;

/// Time span served by the averaged archive.
pub fn new_avg_coverage() -> TimelinesResult<(DateTime<Utc>, DateTime<Utc>)> {
    Ok((
        from_epoch_millis(NEW_AVG_START_MS)?,
        from_epoch_millis(NEW_AVG_END_MS)?,
    ))
}

/// URL of the monthly file for satellite `nr` covering the month of `month`.
pub fn new_avg_url(month: &DateTime<Utc>, nr: u32) -> String {
    let nr = format!("{:02}", nr);
    NEW_AVG_URL_TEMPLATE
        .replace("{year}", &month.year().to_string())
        .replace("{month}", &format!("{:02}", month.month()))
        .replace("{nr}", &nr)
        .replace(
            "{first_day}",
            &first_day_of_month(month).format("%Y%m%d").to_string(),
        )
        .replace(
            "{last_day}",
            &last_day_of_month(month).format("%Y%m%d").to_string(),
        )
}

/// Candidate URLs for a month, one per satellite.
pub fn candidate_urls(month: &DateTime<Utc>) -> Vec<String> {
    SATELLITES.map(|nr| new_avg_url(month, nr)).collect()
}

/// Whether two instants are served by the same monthly file.
pub fn same_download_site(a: &DateTime<Utc>, b: &DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}
