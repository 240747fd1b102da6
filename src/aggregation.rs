//! Grouped totals shared by the linkage engine and every analysis pipeline.
//!
//! All grouping goes through [`group_by`], and every `(period, product)` key
//! is built by [`period_product_key`]: rows without a resolved month are
//! skipped, product codes are normalized, and the optional allowed-period and
//! product-scope filters are applied the same way everywhere.

use crate::normalize::normalize_product_text;
use crate::schema::{SalesRecord, YearMonth};
use crate::utils::{finite_or_zero, mean, safe_divide};
use std::collections::{BTreeMap, BTreeSet};

/// Optional bounds applied while building period/product keys. `None` means
/// unbounded; `Some` of an empty set admits nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TotalsFilter<'a> {
    pub allowed_periods: Option<&'a BTreeSet<YearMonth>>,
    pub product_scope: Option<&'a BTreeSet<String>>,
}

impl<'a> TotalsFilter<'a> {
    pub fn admits_period(&self, period: Option<YearMonth>) -> bool {
        match (self.allowed_periods, period) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(allowed), Some(p)) => allowed.contains(&p),
        }
    }

    pub fn admits_product(&self, code: &str) -> bool {
        self.product_scope.map_or(true, |scope| scope.contains(code))
    }
}

/// The canonical `(period, product)` key, or `None` when the row has no month
/// or falls outside `filter`.
pub fn period_product_key(
    period: Option<YearMonth>,
    product_code: &str,
    filter: &TotalsFilter<'_>,
) -> Option<(YearMonth, String)> {
    let period = period?;
    if !filter.admits_period(Some(period)) {
        return None;
    }
    let code = normalize_product_text(product_code);
    filter.admits_product(&code).then_some((period, code))
}

/// Folds rows into one accumulator per key. Rows whose key is `None` are
/// skipped.
pub fn group_by<'a, T: 'a, K: Ord, A: Default>(
    rows: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&T) -> Option<K>,
    mut fold: impl FnMut(&mut A, &T),
) -> BTreeMap<K, A> {
    let mut groups: BTreeMap<K, A> = BTreeMap::new();
    for row in rows {
        if let Some(k) = key(row) {
            fold(groups.entry(k).or_default(), row);
        }
    }
    groups
}

/// What to sum for each group: a units column, an optional order identifier
/// counted distinctly, and any number of extra summed columns.
pub struct Measures<'m, T> {
    pub units: fn(&T) -> f64,
    pub order_key: Option<fn(&T) -> &str>,
    pub extras: &'m [fn(&T) -> f64],
}

/// Zero-filled totals for one group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTotals {
    pub units: f64,
    pub rows: usize,
    pub distinct_orders: usize,
    pub extras: Vec<f64>,
}

impl GroupTotals {
    pub fn extra(&self, index: usize) -> f64 {
        self.extras.get(index).copied().unwrap_or(0.0)
    }
}

#[derive(Default)]
struct TotalsAccumulator {
    units: f64,
    rows: usize,
    orders: BTreeSet<String>,
    extras: Vec<f64>,
}

/// Sums `measures` per key. Missing numbers count as zero and every extra
/// column is present in every group.
pub fn group_totals<'a, T: 'a, K: Ord>(
    rows: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&T) -> Option<K>,
    measures: &Measures<'_, T>,
) -> BTreeMap<K, GroupTotals> {
    let width = measures.extras.len();
    let grouped = group_by(rows, key, |acc: &mut TotalsAccumulator, row| {
        if acc.extras.len() != width {
            acc.extras = vec![0.0; width];
        }
        acc.units += finite_or_zero((measures.units)(row));
        acc.rows += 1;
        if let Some(order_key) = measures.order_key {
            let id = order_key(row).trim();
            if !id.is_empty() {
                acc.orders.insert(id.to_string());
            }
        }
        for (slot, extra) in acc.extras.iter_mut().zip(measures.extras) {
            *slot += finite_or_zero(extra(row));
        }
    });

    grouped
        .into_iter()
        .map(|(k, acc)| {
            (
                k,
                GroupTotals {
                    units: acc.units,
                    rows: acc.rows,
                    distinct_orders: acc.orders.len(),
                    extras: acc.extras,
                },
            )
        })
        .collect()
}

/// One `(period, product)` group.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodProductTotals {
    pub period: YearMonth,
    pub product_code: String,
    pub totals: GroupTotals,
}

/// Period × product totals over any row type.
pub fn period_product_totals<'a, T: 'a>(
    rows: impl IntoIterator<Item = &'a T>,
    period: fn(&T) -> Option<YearMonth>,
    product: fn(&T) -> &str,
    measures: &Measures<'_, T>,
    filter: &TotalsFilter<'_>,
) -> Vec<PeriodProductTotals> {
    group_totals(
        rows,
        |row| period_product_key(period(row), product(row), filter),
        measures,
    )
    .into_iter()
    .map(|((period, product_code), totals)| PeriodProductTotals {
        period,
        product_code,
        totals,
    })
    .collect()
}

/// Units sold per sales row, zero when missing.
pub fn sales_units(row: &SalesRecord) -> f64 {
    row.units()
}

fn sales_product(row: &SalesRecord) -> &str {
    &row.product_code
}

fn sales_invoice(row: &SalesRecord) -> &str {
    &row.invoice_number
}

fn sales_revenue(row: &SalesRecord) -> f64 {
    row.gross_revenue
}

/// Units, distinct invoices and revenue per `(period, product)` of sales.
pub fn sales_period_product_totals(
    sales: &[SalesRecord],
    filter: &TotalsFilter<'_>,
) -> Vec<PeriodProductTotals> {
    let measures = Measures {
        units: sales_units,
        order_key: Some(sales_invoice),
        extras: &[sales_revenue],
    };
    period_product_totals(sales, SalesRecord::period, sales_product, &measures, filter)
}

/// Descriptive fields carried next to every aggregate so it can be merged
/// back with other views. The first row seen for a group wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lineage {
    pub category: String,
    pub product_description: String,
    pub listing_code: String,
    pub manufacturer_code: String,
    pub listing_type: String,
}

impl Lineage {
    fn from_sale(row: &SalesRecord) -> Self {
        Self {
            category: row.category.clone(),
            product_description: row.product_description.clone(),
            listing_code: row.listing_code.clone(),
            manufacturer_code: row.manufacturer_code.clone(),
            listing_type: row.listing_type.clone(),
        }
    }
}

/// Running sales metrics for one group of rows.
#[derive(Debug, Clone, Default)]
pub struct SalesMetrics {
    pub lineage: Lineage,
    pub rows: usize,
    pub units: f64,
    pub revenue: f64,
    pub cost_total: f64,
    pub gross_profit: f64,
    invoices: BTreeSet<String>,
    periods: BTreeSet<YearMonth>,
    margins: Vec<f64>,
    prices: Vec<f64>,
    unit_costs: Vec<f64>,
}

impl SalesMetrics {
    pub fn add(&mut self, row: &SalesRecord) {
        if self.rows == 0 {
            self.lineage = Lineage::from_sale(row);
        }
        self.rows += 1;
        self.units += finite_or_zero(row.units());
        self.revenue += finite_or_zero(row.gross_revenue);
        self.cost_total += finite_or_zero(row.cost_total);
        self.gross_profit += finite_or_zero(row.estimated_gross_profit);

        let invoice = row.invoice_number.trim();
        if !invoice.is_empty() {
            self.invoices.insert(invoice.to_string());
        }
        if let Some(period) = row.period() {
            self.periods.insert(period);
        }
        if let Some(margin) = row.margin_fraction.filter(|v| v.is_finite()) {
            self.margins.push(margin);
        }
        if let Some(price) = row.unit_price.filter(|v| v.is_finite()) {
            self.prices.push(price);
        }
        if let Some(cost) = row.unit_cost.filter(|v| v.is_finite()) {
            self.unit_costs.push(cost);
        }
    }

    /// Distinct non-empty invoice numbers.
    pub fn orders(&self) -> usize {
        self.invoices.len()
    }

    /// Distinct resolved months with at least one row.
    pub fn months(&self) -> usize {
        self.periods.len()
    }

    pub fn mean_margin(&self) -> Option<f64> {
        mean(&self.margins)
    }

    pub fn mean_price(&self) -> Option<f64> {
        mean(&self.prices)
    }

    pub fn min_price(&self) -> Option<f64> {
        self.prices.iter().copied().reduce(f64::min)
    }

    pub fn mean_unit_cost(&self) -> Option<f64> {
        mean(&self.unit_costs)
    }

    /// Revenue per distinct order.
    pub fn ticket(&self) -> f64 {
        safe_divide(self.revenue, self.orders() as f64)
    }

    /// Revenue per unit sold.
    pub fn average_sold_price(&self) -> f64 {
        safe_divide(self.revenue, self.units)
    }
}

/// Groups sales rows into [`SalesMetrics`] per key.
pub fn group_sales<'a, K: Ord>(
    rows: impl IntoIterator<Item = &'a SalesRecord>,
    key: impl Fn(&SalesRecord) -> Option<K>,
) -> BTreeMap<K, SalesMetrics> {
    group_by(rows, key, |metrics: &mut SalesMetrics, row| metrics.add(row))
}

/// Sales metrics per `(period, product)`, keyed the same way as every other
/// period/product aggregate.
pub fn sales_by_period_product(
    sales: &[SalesRecord],
    filter: &TotalsFilter<'_>,
) -> BTreeMap<(YearMonth, String), SalesMetrics> {
    group_sales(sales, |row| period_product_key(row.period(), &row.product_code, filter))
}

/// Sales metrics per product. Rows without a month still count here.
pub fn sales_by_product(sales: &[SalesRecord]) -> BTreeMap<String, SalesMetrics> {
    group_sales(sales, |row| Some(normalize_product_text(&row.product_code)))
}
