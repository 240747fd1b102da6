use crate::error::{AnalyticsError, Result};
use crate::normalize::normalize_product_text;
use crate::period::parse_day_first_date;
use crate::schema::{ReturnRecord, SalesRecord, YearMonth, UNCATEGORIZED};
use crate::utils::round2;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Where a dataset's return totals come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnsSource {
    /// Single-sheet exports: returned units and revenue live on the sales rows.
    #[default]
    Embedded,
    /// One or more dedicated return sheets were found; they are authoritative.
    ReturnSheets,
}

/// Sales rows paired with the return rows that belong to them.
///
/// Every filter produces a new dataset carrying both halves, so a filtered
/// sales view never loses (or leaks) its returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalesDataset {
    pub sales: Vec<SalesRecord>,
    pub returns: Vec<ReturnRecord>,
    #[serde(default)]
    pub returns_source: ReturnsSource,
}

impl SalesDataset {
    pub fn new(sales: Vec<SalesRecord>, returns: Vec<ReturnRecord>, returns_source: ReturnsSource) -> Self {
        Self {
            sales,
            returns,
            returns_source,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sales.is_empty()
    }

    fn with_sales(&self, sales: Vec<SalesRecord>, returns: Vec<ReturnRecord>) -> Self {
        Self {
            sales,
            returns,
            returns_source: self.returns_source,
        }
    }

    /// Restricts both halves to one category. `None` or a blank name keeps
    /// everything. Return rows without a usable category survive when their
    /// product still sells in the filtered scope.
    pub fn filter_category(&self, category: Option<&str>) -> Self {
        let category = match category.map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => return self.clone(),
        };

        let sales: Vec<SalesRecord> = self
            .sales
            .iter()
            .filter(|r| r.category == category)
            .cloned()
            .collect();
        let scope = product_scope_of(&sales);

        let returns = self
            .returns
            .iter()
            .filter(|r| {
                let own = r.category.trim();
                own == category
                    || ((own.is_empty() || own == UNCATEGORIZED) && scope.contains(&r.product_code))
            })
            .cloned()
            .collect();

        self.with_sales(sales, returns)
    }

    /// Keeps sales whose date falls inside `range`. Undated rows are kept
    /// when their period falls inside the range's months, and dropped when
    /// they have neither. Returns are kept whole; linkage bounds them to the
    /// periods and products still in scope.
    pub fn filter_date_range(&self, range: &DateRange) -> Self {
        if range.is_unbounded() {
            return self.clone();
        }
        let sales = self
            .sales
            .iter()
            .filter(|r| match r.date {
                Some(d) => range.contains(d),
                None => r.period.is_some_and(|p| range.contains_period(p)),
            })
            .cloned()
            .collect();
        self.with_sales(sales, self.returns.clone())
    }

    /// Restricts both halves to the given product codes. An empty list keeps
    /// everything.
    pub fn filter_products(&self, codes: &[String]) -> Self {
        let wanted: BTreeSet<String> = codes
            .iter()
            .map(|c| normalize_product_text(c))
            .filter(|c| !c.is_empty())
            .collect();
        if wanted.is_empty() {
            return self.clone();
        }

        let sales = self
            .sales
            .iter()
            .filter(|r| wanted.contains(&r.product_code))
            .cloned()
            .collect();
        let returns = self
            .returns
            .iter()
            .filter(|r| wanted.contains(&r.product_code))
            .cloned()
            .collect();
        self.with_sales(sales, returns)
    }

    /// Product codes with at least one sales row.
    pub fn product_scope(&self) -> BTreeSet<String> {
        product_scope_of(&self.sales)
    }

    /// Resolved sale months. Rows without a month never contribute.
    pub fn sale_periods(&self) -> BTreeSet<YearMonth> {
        self.sales.iter().filter_map(SalesRecord::period).collect()
    }

    pub fn categories(&self) -> Vec<String> {
        self.sales
            .iter()
            .map(|r| r.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn product_scope_of(sales: &[SalesRecord]) -> BTreeSet<String> {
    sales
        .iter()
        .filter(|r| !r.product_code.is_empty())
        .map(|r| r.product_code.clone())
        .collect()
}

/// An inclusive calendar-date window. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Builds a range, swapping the bounds when they arrive reversed.
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        match (start, end) {
            (Some(s), Some(e)) if s > e => Self {
                start: Some(e),
                end: Some(s),
            },
            _ => Self { start, end },
        }
    }

    /// Parses optional day-first or ISO date strings into a range.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let parse = |raw: Option<&str>| -> Result<Option<NaiveDate>> {
            match raw.map(str::trim).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(text) => parse_day_first_date(text)
                    .map(Some)
                    .ok_or_else(|| AnalyticsError::DateError(format!("unrecognized date '{}'", text))),
            }
        };
        Ok(Self::new(parse(start)?, parse(end)?))
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    /// Month-level check for rows that carry a period but no date: the month
    /// must lie between the months of the two bounds.
    pub fn contains_period(&self, period: YearMonth) -> bool {
        self.start.map_or(true, |s| period >= YearMonth::from_date(s))
            && self.end.map_or(true, |e| period <= YearMonth::from_date(e))
    }
}

/// All-time minimum sold price per product, computed once from the full
/// dataset and shared by the ranking pipelines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPrices {
    prices: BTreeMap<String, f64>,
}

impl HistoricalPrices {
    pub fn from_sales(sales: &[SalesRecord]) -> Self {
        let prices = min_unit_prices(sales.iter())
            .into_iter()
            .map(|(code, price)| (code, round2(price)))
            .collect();
        Self { prices }
    }

    pub fn get(&self, product_code: &str) -> Option<f64> {
        self.prices.get(product_code).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Minimum finite unit price per product across `rows`.
pub fn min_unit_prices<'a>(rows: impl Iterator<Item = &'a SalesRecord>) -> BTreeMap<String, f64> {
    let mut prices: BTreeMap<String, f64> = BTreeMap::new();
    for row in rows {
        let Some(price) = row.unit_price.filter(|p| p.is_finite()) else {
            continue;
        };
        prices
            .entry(row.product_code.clone())
            .and_modify(|current| *current = current.min(price))
            .or_insert(price);
    }
    prices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale(category: &str, code: &str, date: Option<(i32, u32, u32)>) -> SalesRecord {
        let date = date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d));
        SalesRecord {
            category: category.to_string(),
            product_code: code.to_string(),
            date,
            period: date.map(YearMonth::from_date),
            units_sold: Some(1.0),
            ..Default::default()
        }
    }

    fn ret(category: &str, code: &str) -> ReturnRecord {
        ReturnRecord {
            category: category.to_string(),
            product_code: code.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_category_filter_keeps_uncategorized_returns_in_scope() {
        let dataset = SalesDataset::new(
            vec![sale("Games", "1", None), sale("Toys", "2", None)],
            vec![
                ret("Games", "1"),
                ret("Toys", "2"),
                ret("", "1"),
                ret(UNCATEGORIZED, "2"),
            ],
            ReturnsSource::ReturnSheets,
        );

        let games = dataset.filter_category(Some("Games"));
        assert_eq!(games.sales.len(), 1);
        assert_eq!(games.returns.len(), 2);
        assert!(games.returns.iter().all(|r| r.product_code == "1"));
        assert_eq!(games.returns_source, ReturnsSource::ReturnSheets);

        assert_eq!(dataset.filter_category(None), dataset);
        assert_eq!(dataset.filter_category(Some("  ")), dataset);
    }

    #[test]
    fn test_date_range_swaps_and_drops_undated_rows() {
        let range = DateRange::parse(Some("31/03/2024"), Some("2024-02-01")).unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 3, 31));

        let dataset = SalesDataset::new(
            vec![
                sale("A", "1", Some((2024, 1, 15))),
                sale("A", "1", Some((2024, 3, 31))),
                sale("A", "2", None),
            ],
            vec![ret("A", "1")],
            ReturnsSource::ReturnSheets,
        );
        let filtered = dataset.filter_date_range(&range);
        assert_eq!(filtered.sales.len(), 1);
        assert_eq!(filtered.returns.len(), 1);

        assert!(DateRange::parse(Some("not a date"), None).is_err());
    }

    #[test]
    fn test_date_range_falls_back_to_period_for_undated_rows() {
        let month_only = |code: &str, year: i32, month: u32| SalesRecord {
            product_code: code.to_string(),
            period: YearMonth::new(year, month),
            units_sold: Some(1.0),
            ..Default::default()
        };
        let dataset = SalesDataset::new(
            vec![
                month_only("1", 2024, 3),
                month_only("2", 2023, 12),
                month_only("3", 2024, 6),
                sale("A", "4", None),
            ],
            Vec::new(),
            ReturnsSource::Embedded,
        );

        let year = DateRange::parse(Some("2024-01-01"), Some("2024-12-31")).unwrap();
        let kept: Vec<_> = dataset
            .filter_date_range(&year)
            .sales
            .iter()
            .map(|r| r.product_code.clone())
            .collect();
        assert_eq!(kept, vec!["1", "3"]);

        let mid_month = DateRange::parse(Some("15/03/2024"), Some("10/06/2024")).unwrap();
        assert_eq!(dataset.filter_date_range(&mid_month).sales.len(), 2);

        let open_end = DateRange::new(NaiveDate::from_ymd_opt(2024, 4, 1), None);
        assert_eq!(dataset.filter_date_range(&open_end).sales.len(), 1);
    }

    #[test]
    fn test_filter_products_normalizes_codes() {
        let dataset = SalesDataset::new(
            vec![sale("A", "123", None), sale("A", "456", None)],
            vec![ret("A", "123"), ret("A", "456")],
            ReturnsSource::ReturnSheets,
        );
        let filtered = dataset.filter_products(&["123.0".to_string()]);
        assert_eq!(filtered.sales.len(), 1);
        assert_eq!(filtered.returns.len(), 1);
        assert_eq!(filtered.product_scope().into_iter().collect::<Vec<_>>(), vec!["123"]);
    }

    #[test]
    fn test_historical_prices_take_minimum() {
        let mut a = sale("A", "1", None);
        a.unit_price = Some(10.004);
        let mut b = sale("A", "1", None);
        b.unit_price = Some(12.0);
        let c = sale("A", "2", None);

        let prices = HistoricalPrices::from_sales(&[a, b, c]);
        assert_eq!(prices.get("1"), Some(10.0));
        assert_eq!(prices.get("2"), None);
    }
}
