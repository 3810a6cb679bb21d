use chrono::{Datelike, Local, NaiveDate, Weekday};

/// Every Friday in `month0` (zero-based) of `year`, ascending.
///
/// Months have four or five Fridays; callers must not assume a fixed length.
/// An out-of-range month yields an empty axis.
pub fn fridays_in_month(year: i32, month0: u32) -> Vec<NaiveDate> {
    let Some(first) = NaiveDate::from_ymd_opt(year, month0 + 1, 1) else {
        return Vec::new();
    };
    let offset = (7 + Weekday::Fri.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    let mut out = Vec::with_capacity(5);
    let mut day = first + chrono::Duration::days(offset as i64);
    while day.month0() == month0 {
        out.push(day);
        day += chrono::Duration::days(7);
    }
    out
}

/// Parses an IPC month key (`YYYY-MM`, 1-based month) into (year, zero-based month).
pub fn parse_month_key(month: &str) -> Option<(i32, u32)> {
    let (y, m) = month.trim().split_once('-')?;
    let year = y.trim().parse::<i32>().ok()?;
    let month_num = m.trim().parse::<u32>().ok()?;
    if !(1..=12).contains(&month_num) {
        return None;
    }
    Some((year, month_num - 1))
}

pub fn month_key(year: i32, month0: u32) -> String {
    format!("{:04}-{:02}", year, month0 + 1)
}

pub fn current_month() -> (i32, u32) {
    let today = Local::now().date_naive();
    (today.year(), today.month0())
}
