use super::{money, optional_money};
use crate::aggregation::{group_sales, sales_by_period_product, sales_by_product, SalesMetrics, TotalsFilter};
use crate::dataset::SalesDataset;
use crate::linkage::{dataset_linkage, PeriodBasis, ReturnTotal};
use crate::normalize::normalize_product_text;
use crate::table::{AnalysisOutput, Cell, Table};
use crate::utils::{desc, safe_divide};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProductFocusConfig {
    pub category: Option<String>,
    /// Restrict to these product codes. Empty means every product in scope.
    pub product_codes: Vec<String>,
}

const METRIC_COLUMNS: &[&str] = &[
    "product_description",
    "manufacturer_code",
    "listing_type",
    "orders",
    "units_sold",
    "revenue",
    "ticket",
    "average_sold_price",
    "mean_price",
    "period_min_price",
    "mean_margin",
    "gross_profit",
    "cost_total",
    "units_returned",
    "return_rate",
    "returned_revenue",
];

fn with_keys(keys: &[&str]) -> Table {
    let columns: Vec<&str> = keys.iter().chain(METRIC_COLUMNS.iter()).copied().collect();
    Table::new(&columns)
}

fn metric_cells(metrics: &SalesMetrics, returned: ReturnTotal) -> Vec<Cell> {
    vec![
        metrics.lineage.product_description.clone().into(),
        metrics.lineage.manufacturer_code.clone().into(),
        metrics.lineage.listing_type.clone().into(),
        metrics.orders().into(),
        metrics.units.into(),
        money(metrics.revenue),
        money(metrics.ticket()),
        money(metrics.average_sold_price()),
        optional_money(metrics.mean_price()),
        optional_money(metrics.min_price()),
        metrics.mean_margin().into(),
        money(metrics.gross_profit),
        money(metrics.cost_total),
        returned.units_returned.into(),
        safe_divide(returned.units_returned, metrics.units).into(),
        money(returned.returned_revenue),
    ]
}

/// Summary, daily and monthly rollups for a category or a list of products,
/// each merged with the matching return totals.
///
/// Daily rows need a sale date; undated rows still count in the summary and,
/// when they have a month, in the monthly view.
pub fn build_product_focus_analysis(dataset: &SalesDataset, config: &ProductFocusConfig) -> AnalysisOutput {
    let data = dataset
        .filter_category(config.category.as_deref())
        .filter_products(&config.product_codes);
    let linkage = dataset_linkage(&data, PeriodBasis::SalePeriod);

    let mut by_product: Vec<(String, SalesMetrics)> = sales_by_product(&data.sales).into_iter().collect();
    by_product.sort_by(|(code_a, a), (code_b, b)| {
        desc(a.revenue, b.revenue)
            .then_with(|| desc(a.units, b.units))
            .then_with(|| code_a.cmp(code_b))
    });
    let mut summary = with_keys(&["product_code"]);
    for (code, metrics) in &by_product {
        let mut row = vec![code.clone().into()];
        row.extend(metric_cells(metrics, linkage.overall(code)));
        summary.push_row(row);
    }

    let daily_groups = group_sales(&data.sales, |r| {
        r.date.map(|d| (d, normalize_product_text(&r.product_code)))
    });
    let mut daily = with_keys(&["date", "product_code"]);
    for ((date, code), metrics) in &daily_groups {
        let mut row = vec![(*date).into(), code.clone().into()];
        row.extend(metric_cells(metrics, linkage.daily(*date, code)));
        daily.push_row(row);
    }

    let monthly_groups = sales_by_period_product(&data.sales, &TotalsFilter::default());
    let mut monthly = with_keys(&["period", "product_code"]);
    for ((period, code), metrics) in &monthly_groups {
        let mut row = vec![period.to_string().into(), code.clone().into()];
        row.extend(metric_cells(metrics, linkage.monthly(*period, code)));
        monthly.push_row(row);
    }

    debug!(
        "Product focus: {} products, {} daily rows, {} monthly rows",
        summary.len(),
        daily.len(),
        monthly.len()
    );

    let mut output = AnalysisOutput::new();
    output.insert("product_summary", summary);
    output.insert("daily", daily);
    output.insert("monthly", monthly);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ReturnsSource;
    use crate::schema::{ReturnRecord, SalesRecord, YearMonth};
    use chrono::NaiveDate;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    fn sale(code: &str, category: &str, on: Option<NaiveDate>, units: f64, price: f64) -> SalesRecord {
        SalesRecord {
            date: on,
            period: on.map(YearMonth::from_date).or(YearMonth::new(2024, 1)),
            category: category.into(),
            product_code: code.into(),
            invoice_number: format!("NF-{}-{}", code, units),
            units_sold: Some(units),
            unit_price: Some(price),
            gross_revenue: units * price,
            margin_fraction: Some(0.25),
            estimated_gross_profit: units * price * 0.25,
            ..Default::default()
        }
    }

    fn dataset() -> SalesDataset {
        let sales = vec![
            sale("1", "Games", Some(date(1, 5)), 2.0, 50.0),
            sale("1", "Games", Some(date(2, 7)), 4.0, 45.0),
            sale("1", "Games", None, 1.0, 40.0),
            sale("2", "Games", Some(date(1, 5)), 10.0, 5.0),
            sale("3", "Toys", Some(date(1, 5)), 99.0, 1.0),
        ];
        let returns = vec![ReturnRecord {
            product_code: "1".into(),
            category: "Games".into(),
            sale_date: Some(date(1, 5)),
            sale_period: YearMonth::new(2024, 1),
            return_date: Some(date(1, 20)),
            sale_invoice_number: "NF-1-2".into(),
            units_returned: Some(1.0),
            returned_revenue: Some(50.0),
            ..Default::default()
        }];
        SalesDataset::new(sales, returns, ReturnsSource::ReturnSheets)
    }

    #[test]
    fn test_category_focus_builds_three_views() {
        let config = ProductFocusConfig {
            category: Some("Games".into()),
            ..Default::default()
        };
        let output = build_product_focus_analysis(&dataset(), &config);
        assert_eq!(output.names(), vec!["product_summary", "daily", "monthly"]);

        let summary = output.get("product_summary").unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.value(0, "product_code"), Some(&Cell::Text("1".into())));
        assert_eq!(summary.value(0, "units_sold"), Some(&Cell::Number(7.0)));
        assert_eq!(summary.value(0, "revenue"), Some(&Cell::Number(320.0)));
        assert_eq!(summary.value(0, "units_returned"), Some(&Cell::Number(1.0)));
        assert_eq!(summary.value(0, "period_min_price"), Some(&Cell::Number(40.0)));

        let daily = output.get("daily").unwrap();
        assert_eq!(daily.len(), 3);
        assert_eq!(daily.value(0, "date"), Some(&Cell::Date(date(1, 5))));
        assert_eq!(daily.value(0, "return_rate"), Some(&Cell::Number(0.5)));

        let monthly = output.get("monthly").unwrap();
        let january = monthly.find_row("period", "2024-01").unwrap();
        assert_eq!(monthly.value(january, "product_code"), Some(&Cell::Text("1".into())));
        assert_eq!(monthly.value(january, "units_sold"), Some(&Cell::Number(3.0)));
        assert_eq!(monthly.value(january, "units_returned"), Some(&Cell::Number(1.0)));
    }

    #[test]
    fn test_product_codes_narrow_the_scope() {
        let config = ProductFocusConfig {
            category: None,
            product_codes: vec!["2.0".into()],
        };
        let output = build_product_focus_analysis(&dataset(), &config);
        let summary = output.get("product_summary").unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary.value(0, "product_code"), Some(&Cell::Text("2".into())));
        assert_eq!(summary.value(0, "units_returned"), Some(&Cell::Number(0.0)));
        assert_eq!(summary.value(0, "return_rate"), Some(&Cell::Number(0.0)));
    }
}
