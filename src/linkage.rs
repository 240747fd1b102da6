//! Joins return events onto sales by `(period, product)`.
//!
//! Invoice numbers are never part of the join key: one invoice can be split
//! across several shipments and returns, so the month and the product are the
//! only identifiers both sides share reliably. Invoices are only used to
//! count distinct returned orders.

use crate::aggregation::{
    group_totals, period_product_key, sales_period_product_totals, GroupTotals, Measures,
    TotalsFilter,
};
use crate::dataset::{ReturnsSource, SalesDataset};
use crate::normalize::normalize_product_text;
use crate::schema::{ReturnRecord, SalesRecord, YearMonth};
use crate::table::{Cell, Table, TableRow};
use crate::utils::{round2, safe_divide};
use chrono::NaiveDate;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which month a return is counted against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PeriodBasis {
    /// The month of the sale the return reverses.
    #[default]
    SalePeriod,
    /// The month the return happened.
    ReturnPeriod,
}

/// Bounds for a linkage run. Allowed periods always refer to the sale month,
/// whatever the grouping basis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkageScope {
    pub category: Option<String>,
    pub allowed_periods: Option<BTreeSet<YearMonth>>,
    pub product_scope: Option<BTreeSet<String>>,
}

impl LinkageScope {
    /// The months and products present in `dataset`'s sales.
    pub fn for_dataset(dataset: &SalesDataset) -> Self {
        Self {
            category: None,
            allowed_periods: Some(dataset.sale_periods()),
            product_scope: Some(dataset.product_scope()),
        }
    }

    pub fn admits(&self, record: &ReturnRecord) -> bool {
        if let Some(category) = &self.category {
            if record.category.trim() != category.trim() {
                return false;
            }
        }
        let filter = TotalsFilter {
            allowed_periods: self.allowed_periods.as_ref(),
            product_scope: self.product_scope.as_ref(),
        };
        filter.admits_period(record.sale_month())
            && filter.admits_product(&normalize_product_text(&record.product_code))
    }
}

/// Returned units, distinct returned orders and returned revenue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnTotal {
    pub units_returned: f64,
    pub returned_orders: usize,
    pub returned_revenue: f64,
}

impl From<GroupTotals> for ReturnTotal {
    fn from(totals: GroupTotals) -> Self {
        Self {
            units_returned: totals.units,
            returned_orders: totals.distinct_orders,
            returned_revenue: totals.extra(0),
        }
    }
}

/// Return totals in three shapes. Every lookup answers with a zero total for
/// keys that saw no returns, so sales aggregates can left-join without gaps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnLinkage {
    basis: PeriodBasis,
    overall: BTreeMap<String, ReturnTotal>,
    monthly: BTreeMap<(YearMonth, String), ReturnTotal>,
    daily: BTreeMap<(NaiveDate, String), ReturnTotal>,
}

impl ReturnLinkage {
    pub fn basis(&self) -> PeriodBasis {
        self.basis
    }

    pub fn overall(&self, product_code: &str) -> ReturnTotal {
        self.overall.get(product_code).copied().unwrap_or_default()
    }

    pub fn monthly(&self, period: YearMonth, product_code: &str) -> ReturnTotal {
        self.monthly
            .get(&(period, product_code.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn daily(&self, date: NaiveDate, product_code: &str) -> ReturnTotal {
        self.daily
            .get(&(date, product_code.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn overall_totals(&self) -> &BTreeMap<String, ReturnTotal> {
        &self.overall
    }

    pub fn monthly_totals(&self) -> &BTreeMap<(YearMonth, String), ReturnTotal> {
        &self.monthly
    }

    pub fn daily_totals(&self) -> &BTreeMap<(NaiveDate, String), ReturnTotal> {
        &self.daily
    }

    pub fn is_empty(&self) -> bool {
        self.overall.is_empty()
    }

    /// Flat tables for the three shapes: `overall`, `monthly` and `daily`.
    pub fn to_tables(&self) -> Vec<(&'static str, Table)> {
        let totals = |t: &ReturnTotal| -> Vec<Cell> {
            vec![
                t.units_returned.into(),
                t.returned_orders.into(),
                round2(t.returned_revenue).into(),
            ]
        };
        const TOTAL_COLUMNS: [&str; 3] = ["units_returned", "returned_orders", "returned_revenue"];

        let mut overall = Table::new(&[&["product_code"][..], &TOTAL_COLUMNS[..]].concat());
        for (code, t) in &self.overall {
            overall.push_row([vec![code.clone().into()], totals(t)].concat());
        }
        let mut monthly = Table::new(&[&["period", "product_code"][..], &TOTAL_COLUMNS[..]].concat());
        for ((period, code), t) in &self.monthly {
            monthly.push_row([vec![period.to_string().into(), code.clone().into()], totals(t)].concat());
        }
        let mut daily = Table::new(&[&["date", "product_code"][..], &TOTAL_COLUMNS[..]].concat());
        for ((date, code), t) in &self.daily {
            daily.push_row([vec![(*date).into(), code.clone().into()], totals(t)].concat());
        }
        vec![("overall", overall), ("monthly", monthly), ("daily", daily)]
    }
}

fn returned_units(r: &ReturnRecord) -> f64 {
    r.units_returned.unwrap_or(0.0)
}

fn returned_revenue(r: &ReturnRecord) -> f64 {
    r.returned_revenue.unwrap_or(0.0)
}

/// Links return rows into overall, monthly and daily totals. Monthly and
/// daily keys follow `basis`; rows without a month (or date) for that basis
/// still count in the overall totals.
pub fn link(returns: &[ReturnRecord], scope: &LinkageScope, basis: PeriodBasis) -> ReturnLinkage {
    let in_scope: Vec<&ReturnRecord> = returns.iter().filter(|r| scope.admits(r)).collect();
    let measures = Measures {
        units: returned_units,
        order_key: Some(ReturnRecord::returned_order_id),
        extras: &[returned_revenue],
    };
    let unbounded = TotalsFilter::default();

    let month_of = |r: &ReturnRecord| match basis {
        PeriodBasis::SalePeriod => r.sale_month(),
        PeriodBasis::ReturnPeriod => r.return_month(),
    };
    let date_of = |r: &ReturnRecord| match basis {
        PeriodBasis::SalePeriod => r.sale_date,
        PeriodBasis::ReturnPeriod => r.return_date,
    };

    let overall = group_totals(
        in_scope.iter().copied(),
        |r| Some(normalize_product_text(&r.product_code)),
        &measures,
    );
    let monthly = group_totals(
        in_scope.iter().copied(),
        |r| period_product_key(month_of(r), &r.product_code, &unbounded),
        &measures,
    );
    let daily = group_totals(
        in_scope.iter().copied(),
        |r| date_of(r).map(|d| (d, normalize_product_text(&r.product_code))),
        &measures,
    );

    debug!(
        "Linked {} of {} return rows into {} products ({:?})",
        in_scope.len(),
        returns.len(),
        overall.len(),
        basis
    );

    ReturnLinkage {
        basis,
        overall: overall.into_iter().map(|(k, v)| (k, v.into())).collect(),
        monthly: monthly.into_iter().map(|(k, v)| (k, v.into())).collect(),
        daily: daily.into_iter().map(|(k, v)| (k, v.into())).collect(),
    }
}

fn embedded_units(r: &SalesRecord) -> f64 {
    r.units_returned.unwrap_or(0.0)
}

fn embedded_revenue(r: &SalesRecord) -> f64 {
    r.returned_revenue.unwrap_or(0.0)
}

fn embedded_order(r: &SalesRecord) -> &str {
    if r.units_returned.unwrap_or(0.0) > 0.0 {
        &r.invoice_number
    } else {
        ""
    }
}

/// Return totals read from the returned-units columns of the sales rows
/// themselves, for workbooks without return sheets. A returned order is an
/// invoice with at least one returned unit.
pub fn embedded_linkage(sales: &[SalesRecord]) -> ReturnLinkage {
    let measures = Measures {
        units: embedded_units,
        order_key: Some(embedded_order),
        extras: &[embedded_revenue],
    };
    let unbounded = TotalsFilter::default();

    let overall = group_totals(sales, |r| Some(normalize_product_text(&r.product_code)), &measures);
    let monthly = group_totals(
        sales,
        |r| period_product_key(r.period(), &r.product_code, &unbounded),
        &measures,
    );
    let daily = group_totals(
        sales,
        |r| r.date.map(|d| (d, normalize_product_text(&r.product_code))),
        &measures,
    );

    ReturnLinkage {
        basis: PeriodBasis::SalePeriod,
        overall: overall.into_iter().map(|(k, v)| (k, v.into())).collect(),
        monthly: monthly.into_iter().map(|(k, v)| (k, v.into())).collect(),
        daily: daily.into_iter().map(|(k, v)| (k, v.into())).collect(),
    }
}

/// The linkage for the sales currently in `dataset`: its return sheets bounded
/// to the months and products it sells, or the in-row return columns when
/// the workbook had no return sheets.
pub fn dataset_linkage(dataset: &SalesDataset, basis: PeriodBasis) -> ReturnLinkage {
    match dataset.returns_source {
        ReturnsSource::ReturnSheets => link(&dataset.returns, &LinkageScope::for_dataset(dataset), basis),
        ReturnsSource::Embedded => embedded_linkage(&dataset.sales),
    }
}

/// One row of the monthly sales ⋈ returns join.
#[derive(Debug, Clone, PartialEq)]
pub struct SalesReturnsRow {
    pub period: YearMonth,
    pub product_code: String,
    pub units_sold: f64,
    pub orders: usize,
    pub revenue: f64,
    pub units_returned: f64,
    pub returned_orders: usize,
    pub returned_revenue: f64,
    pub return_rate: f64,
}

impl TableRow for SalesReturnsRow {
    fn columns() -> &'static [&'static str] {
        &[
            "period",
            "product_code",
            "units_sold",
            "orders",
            "revenue",
            "units_returned",
            "returned_orders",
            "returned_revenue",
            "return_rate",
        ]
    }

    fn cells(&self) -> Vec<Cell> {
        vec![
            self.period.to_string().into(),
            self.product_code.clone().into(),
            self.units_sold.into(),
            self.orders.into(),
            round2(self.revenue).into(),
            self.units_returned.into(),
            self.returned_orders.into(),
            round2(self.returned_revenue).into(),
            self.return_rate.into(),
        ]
    }
}

/// Left-joins monthly sales totals with monthly return totals. Every sales
/// group gets a row; missing returns are zero and the rate is always defined.
pub fn join_sales_returns(
    sales: &[SalesRecord],
    linkage: &ReturnLinkage,
    allowed_periods: Option<&BTreeSet<YearMonth>>,
) -> Vec<SalesReturnsRow> {
    let filter = TotalsFilter {
        allowed_periods,
        product_scope: None,
    };
    sales_period_product_totals(sales, &filter)
        .into_iter()
        .map(|group| {
            let returned = linkage.monthly(group.period, &group.product_code);
            SalesReturnsRow {
                period: group.period,
                units_sold: group.totals.units,
                orders: group.totals.distinct_orders,
                revenue: group.totals.extra(0),
                units_returned: returned.units_returned,
                returned_orders: returned.returned_orders,
                returned_revenue: returned.returned_revenue,
                return_rate: safe_divide(returned.units_returned, group.totals.units),
                product_code: group.product_code,
            }
        })
        .collect()
}
