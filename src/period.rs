//! Month resolution for sales and return rows.
//!
//! A row's month comes from its period column when that column holds a month,
//! a date, or text that parses as either; otherwise from its date column read
//! day-first. Anything else resolves to `None`.

use crate::frame::RawFrame;
use crate::schema::{CellValue, YearMonth};
use crate::utils::excel_serial_to_date;
use chrono::{NaiveDate, NaiveDateTime};

const DAY_FIRST_DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y", "%d/%m/%y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d", "%Y/%m/%d", "%Y%m%d",
];

const DAY_FIRST_DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parses a date written day-first (`31/01/2024`), falling back to ISO forms.
pub fn parse_day_first_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    for format in DAY_FIRST_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    for format in DAY_FIRST_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    None
}

/// Reads a cell as a calendar date. Numbers are taken as Excel serial days.
pub fn cell_to_date(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::Date(date) => Some(*date),
        CellValue::DateTime(dt) => Some(dt.date()),
        CellValue::Text(text) => parse_day_first_date(text),
        CellValue::Float(serial) => excel_serial_to_date(*serial),
        CellValue::Int(serial) => excel_serial_to_date(*serial as f64),
        CellValue::Period(_) | CellValue::Bool(_) | CellValue::Empty => None,
    }
}

/// Reads a period cell: months pass through, dates truncate to their month,
/// integers like `202403` and text like `2024-03` parse as months, and other
/// text is tried as a day-first date.
pub fn cell_to_period(cell: &CellValue) -> Option<YearMonth> {
    match cell {
        CellValue::Period(period) => Some(*period),
        CellValue::Date(date) => Some(YearMonth::from_date(*date)),
        CellValue::DateTime(dt) => Some(YearMonth::from_date(dt.date())),
        CellValue::Int(compact) => YearMonth::parse(&compact.to_string()).ok(),
        CellValue::Float(compact) if compact.fract() == 0.0 => {
            YearMonth::parse(&format!("{}", *compact as i64)).ok()
        }
        CellValue::Text(text) => YearMonth::parse(text)
            .ok()
            .or_else(|| parse_day_first_date(text).map(YearMonth::from_date)),
        _ => None,
    }
}

/// Resolves one month per row, in row order. `period_column` wins for every
/// row where it yields a month; `date_column` covers the rest, and fully
/// covers frames without a period column.
pub fn resolve_periods(
    frame: &RawFrame,
    period_column: &str,
    date_column: Option<&str>,
) -> Vec<Option<YearMonth>> {
    let period_idx = frame.column_index(period_column);
    let date_idx = date_column.and_then(|c| frame.column_index(c));

    frame
        .rows()
        .iter()
        .map(|row| {
            period_idx
                .and_then(|i| cell_to_period(&row[i]))
                .or_else(|| date_idx.and_then(|i| cell_to_date(&row[i]).map(YearMonth::from_date)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(year: i32, month: u32) -> Option<YearMonth> {
        YearMonth::new(year, month)
    }

    #[test]
    fn test_day_first_parsing() {
        assert_eq!(
            parse_day_first_date("05/03/2024"),
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
        assert_eq!(
            parse_day_first_date("2024-03-05"),
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
        assert_eq!(
            parse_day_first_date("05/03/2024 14:30"),
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
        assert_eq!(parse_day_first_date("31/02/2024"), None);
        assert_eq!(parse_day_first_date("garbage"), None);
    }

    #[test]
    fn test_cell_to_period_variants() {
        assert_eq!(cell_to_period(&CellValue::Int(202403)), ym(2024, 3));
        assert_eq!(cell_to_period(&CellValue::Float(202403.0)), ym(2024, 3));
        assert_eq!(cell_to_period(&CellValue::Text("2024-03".into())), ym(2024, 3));
        assert_eq!(cell_to_period(&CellValue::Text("15/03/2024".into())), ym(2024, 3));
        assert_eq!(
            cell_to_period(&CellValue::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())),
            ym(2024, 3)
        );
        assert_eq!(cell_to_period(&CellValue::Text("n/a".into())), None);
    }

    #[test]
    fn test_resolve_prefers_period_column_then_falls_back_to_date() {
        let frame = RawFrame::from_rows(
            vec!["period".into(), "date".into()],
            vec![
                vec![CellValue::Text("202401".into()), CellValue::Text("20/02/2024".into())],
                vec![CellValue::Empty, CellValue::Text("20/02/2024".into())],
                vec![CellValue::Text("bad".into()), CellValue::Text("bad".into())],
            ],
        );
        let periods = resolve_periods(&frame, "period", Some("date"));
        assert_eq!(periods, vec![ym(2024, 1), ym(2024, 2), None]);
    }

    #[test]
    fn test_resolve_without_period_column_uses_date() {
        let frame = RawFrame::from_rows(
            vec!["date".into()],
            vec![
                vec![CellValue::Text("01/12/2023".into())],
                vec![CellValue::Float(45292.0)],
            ],
        );
        let periods = resolve_periods(&frame, "period", Some("date"));
        assert_eq!(periods, vec![ym(2023, 12), ym(2024, 1)]);

        let none = resolve_periods(&frame, "period", None);
        assert_eq!(none, vec![None, None]);
    }
}
