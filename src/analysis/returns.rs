use super::money;
use crate::aggregation::{sales_by_period_product, sales_by_product, Lineage, SalesMetrics, TotalsFilter};
use crate::dataset::SalesDataset;
use crate::linkage::{dataset_linkage, LinkageScope, PeriodBasis, ReturnTotal};
use crate::normalize::normalize_product_text;
use crate::schema::{ReturnRecord, YearMonth};
use crate::table::{AnalysisOutput, Cell, Table, TableRow};
use crate::utils::{desc, mean, month_names, round1, round2, safe_divide};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReturnAnalysisConfig {
    pub category: Option<String>,
    /// A month is flagged when its return rate reaches this fraction.
    pub min_return_rate: f64,
    /// ...and at least this many units were sold in it.
    pub min_monthly_units: f64,
    /// Also summarize returns by the month they happened.
    pub include_return_month_view: bool,
}

impl Default for ReturnAnalysisConfig {
    fn default() -> Self {
        Self {
            category: None,
            min_return_rate: 0.2,
            min_monthly_units: 0.0,
            include_return_month_view: true,
        }
    }
}

struct ProductReturnSummary {
    product_code: String,
    lineage: Lineage,
    months_with_sales: usize,
    units_sold: f64,
    orders: usize,
    revenue: f64,
    returned: ReturnTotal,
    return_rate: f64,
}

impl TableRow for ProductReturnSummary {
    fn columns() -> &'static [&'static str] {
        &[
            "product_code",
            "product_description",
            "category",
            "months_with_sales",
            "units_sold",
            "units_returned",
            "orders",
            "returned_orders",
            "revenue",
            "returned_revenue",
            "return_rate",
        ]
    }

    fn cells(&self) -> Vec<Cell> {
        vec![
            self.product_code.clone().into(),
            self.lineage.product_description.clone().into(),
            self.lineage.category.clone().into(),
            self.months_with_sales.into(),
            self.units_sold.into(),
            self.returned.units_returned.into(),
            self.orders.into(),
            self.returned.returned_orders.into(),
            money(self.revenue),
            money(self.returned.returned_revenue),
            self.return_rate.into(),
        ]
    }
}

struct MonthlyReturnRow {
    period: YearMonth,
    product_code: String,
    product_description: String,
    units_sold: f64,
    orders: usize,
    revenue: f64,
    returned: ReturnTotal,
    return_rate: f64,
}

impl TableRow for MonthlyReturnRow {
    fn columns() -> &'static [&'static str] {
        &[
            "period",
            "product_code",
            "product_description",
            "units_sold",
            "orders",
            "units_returned",
            "revenue",
            "returned_revenue",
            "return_rate",
        ]
    }

    fn cells(&self) -> Vec<Cell> {
        vec![
            self.period.to_string().into(),
            self.product_code.clone().into(),
            self.product_description.clone().into(),
            self.units_sold.into(),
            self.orders.into(),
            self.returned.units_returned.into(),
            money(self.revenue),
            money(self.returned.returned_revenue),
            self.return_rate.into(),
        ]
    }
}

/// Calendar-labelled view of the flagged months.
struct MonthlyOverviewRow<'a>(&'a MonthlyReturnRow);

impl TableRow for MonthlyOverviewRow<'_> {
    fn columns() -> &'static [&'static str] {
        &[
            "year",
            "month_name",
            "month_abbr",
            "period",
            "product_code",
            "product_description",
            "total_returned",
            "total_sold",
            "total_orders",
            "average_return_rate",
        ]
    }

    fn cells(&self) -> Vec<Cell> {
        let row = self.0;
        let (name, abbr) = month_names(row.period.month());
        vec![
            row.period.year().into(),
            name.into(),
            abbr.into(),
            row.period.to_string().into(),
            row.product_code.clone().into(),
            row.product_description.clone().into(),
            row.returned.units_returned.into(),
            row.units_sold.into(),
            row.orders.into(),
            row.return_rate.into(),
        ]
    }
}

struct ReturnMonthRow {
    return_period: YearMonth,
    product_code: String,
    product_description: String,
    units_returned: f64,
    returned_revenue: f64,
    impacted_orders: usize,
    mean_days_to_return: Option<f64>,
}

impl TableRow for ReturnMonthRow {
    fn columns() -> &'static [&'static str] {
        &[
            "return_year",
            "month_name",
            "month_abbr",
            "return_period",
            "product_code",
            "product_description",
            "units_returned",
            "returned_revenue",
            "average_returned_ticket",
            "impacted_orders",
            "mean_days_to_return",
        ]
    }

    fn cells(&self) -> Vec<Cell> {
        let (name, abbr) = month_names(self.return_period.month());
        vec![
            self.return_period.year().into(),
            name.into(),
            abbr.into(),
            self.return_period.to_string().into(),
            self.product_code.clone().into(),
            self.product_description.clone().into(),
            round2(self.units_returned).into(),
            money(self.returned_revenue),
            money(safe_divide(self.returned_revenue, self.units_returned)),
            self.impacted_orders.into(),
            self.mean_days_to_return.map(round1).into(),
        ]
    }
}

#[derive(Default)]
struct ReturnMonthAccumulator {
    product_description: String,
    units_returned: f64,
    returned_revenue: f64,
    orders: BTreeSet<String>,
    days: Vec<f64>,
}

/// Flags months whose return rate crosses the threshold, and summarizes
/// returns per product and per return month.
///
/// Tables: `product_summary`, `monthly_peaks`, `monthly_overview` and, when
/// enabled, `returns_by_return_month`.
pub fn build_return_analysis(dataset: &SalesDataset, config: &ReturnAnalysisConfig) -> AnalysisOutput {
    let data = dataset.filter_category(config.category.as_deref());
    let linkage = dataset_linkage(&data, PeriodBasis::SalePeriod);

    let monthly: Vec<MonthlyReturnRow> = sales_by_period_product(&data.sales, &TotalsFilter::default())
        .into_iter()
        .map(|((period, product_code), metrics)| {
            let returned = linkage.monthly(period, &product_code);
            MonthlyReturnRow {
                return_rate: safe_divide(returned.units_returned, metrics.units),
                period,
                product_description: metrics.lineage.product_description.clone(),
                units_sold: metrics.units,
                orders: metrics.orders(),
                revenue: metrics.revenue,
                returned,
                product_code,
            }
        })
        .collect();

    let mut peaks: Vec<MonthlyReturnRow> = monthly
        .into_iter()
        .filter(|r| r.return_rate >= config.min_return_rate && r.units_sold >= config.min_monthly_units)
        .collect();
    peaks.sort_by(|a, b| {
        desc(a.return_rate, b.return_rate)
            .then_with(|| desc(a.units_sold, b.units_sold))
            .then_with(|| a.period.cmp(&b.period))
            .then_with(|| a.product_code.cmp(&b.product_code))
    });

    let mut overview: Vec<&MonthlyReturnRow> = peaks.iter().collect();
    overview.sort_by(|a, b| a.period.cmp(&b.period).then_with(|| a.product_code.cmp(&b.product_code)));
    let overview: Vec<MonthlyOverviewRow> = overview.into_iter().map(MonthlyOverviewRow).collect();

    let mut summary: Vec<ProductReturnSummary> = sales_by_product(&data.sales)
        .into_iter()
        .map(|(product_code, metrics): (String, SalesMetrics)| {
            let returned = linkage.overall(&product_code);
            ProductReturnSummary {
                return_rate: safe_divide(returned.units_returned, metrics.units),
                months_with_sales: metrics.months(),
                units_sold: metrics.units,
                orders: metrics.orders(),
                revenue: metrics.revenue,
                lineage: metrics.lineage,
                returned,
                product_code,
            }
        })
        .collect();
    summary.sort_by(|a, b| {
        desc(a.return_rate, b.return_rate)
            .then_with(|| desc(a.units_sold, b.units_sold))
            .then_with(|| a.product_code.cmp(&b.product_code))
    });

    debug!(
        "Return analysis: {} products, {} flagged months",
        summary.len(),
        peaks.len()
    );

    let mut output = AnalysisOutput::new();
    output.insert("product_summary", Table::from_rows(&summary));
    output.insert("monthly_peaks", Table::from_rows(&peaks));
    output.insert("monthly_overview", Table::from_rows(&overview));
    if config.include_return_month_view {
        let scope = LinkageScope::for_dataset(&data);
        let in_scope: Vec<&ReturnRecord> = data.returns.iter().filter(|r| scope.admits(r)).collect();
        output.insert("returns_by_return_month", Table::from_rows(&returns_by_return_month(&in_scope)));
    }
    output
}

/// Returns grouped by the month they happened. Rows missing either the sale
/// or the return date are left out of this view.
fn returns_by_return_month(returns: &[&ReturnRecord]) -> Vec<ReturnMonthRow> {
    let mut groups: BTreeMap<(YearMonth, String), ReturnMonthAccumulator> = BTreeMap::new();
    for record in returns {
        let (Some(sold), Some(returned)) = (record.sale_date, record.return_date) else {
            continue;
        };
        let Some(period) = record.return_month() else {
            continue;
        };
        let key = (period, normalize_product_text(&record.product_code));
        let acc = groups.entry(key).or_default();
        if acc.product_description.is_empty() {
            acc.product_description = record.product_description.clone();
        }
        acc.units_returned += record.units_returned.unwrap_or(0.0);
        acc.returned_revenue += record.returned_revenue.unwrap_or(0.0);
        let order = record.returned_order_id();
        if !order.is_empty() {
            acc.orders.insert(order.to_string());
        }
        acc.days.push((returned - sold).num_days() as f64);
    }

    groups
        .into_iter()
        .map(|((return_period, product_code), acc)| ReturnMonthRow {
            return_period,
            product_code,
            product_description: acc.product_description,
            units_returned: acc.units_returned,
            returned_revenue: acc.returned_revenue,
            impacted_orders: acc.orders.len(),
            mean_days_to_return: mean(&acc.days),
        })
        .collect()
}
