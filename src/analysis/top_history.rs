use super::{money, price_references};
use crate::aggregation::{sales_by_period_product, sales_by_product, SalesMetrics, TotalsFilter};
use crate::dataset::{min_unit_prices, HistoricalPrices, SalesDataset};
use crate::linkage::{dataset_linkage, PeriodBasis};
use crate::table::{AnalysisOutput, Cell, Table};
use crate::utils::{desc, safe_divide};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TopHistoryConfig {
    pub category: Option<String>,
    pub rank_size: usize,
    /// Distinct months with sales a product needs to qualify.
    pub min_months: usize,
}

impl Default for TopHistoryConfig {
    fn default() -> Self {
        Self {
            category: None,
            rank_size: 20,
            min_months: 3,
        }
    }
}

const RANKING_COLUMNS: &[&str] = &[
    "rank",
    "product_code",
    "product_description",
    "category",
    "listing_code",
    "months_with_sales",
    "units_sold",
    "revenue",
    "orders",
    "estimated_ticket",
    "interval_avg_price",
    "interval_min_price",
    "all_time_min_price",
    "units_returned",
    "return_rate",
];

const DETAIL_COLUMNS: &[&str] = &[
    "rank",
    "period",
    "product_code",
    "product_description",
    "units_sold",
    "orders",
    "revenue",
    "average_sold_price",
];

/// Consistent sellers: products with sales in at least `min_months` distinct
/// months, ranked by months with sales, then units, then revenue.
pub fn build_top_history_analysis(
    dataset: &SalesDataset,
    config: &TopHistoryConfig,
    prices: Option<&HistoricalPrices>,
) -> AnalysisOutput {
    let data = dataset.filter_category(config.category.as_deref());
    let linkage = dataset_linkage(&data, PeriodBasis::SalePeriod);
    let interval_prices = min_unit_prices(data.sales.iter());

    let mut ranked: Vec<(String, SalesMetrics)> = sales_by_product(&data.sales)
        .into_iter()
        .filter(|(_, m)| m.months() >= config.min_months)
        .collect();
    ranked.sort_by(|(code_a, a), (code_b, b)| {
        b.months()
            .cmp(&a.months())
            .then_with(|| desc(a.units, b.units))
            .then_with(|| desc(a.revenue, b.revenue))
            .then_with(|| code_a.cmp(code_b))
    });
    ranked.truncate(config.rank_size);

    let mut ranking = Table::new(RANKING_COLUMNS);
    for (index, (code, metrics)) in ranked.iter().enumerate() {
        let returned = linkage.overall(code);
        let [interval_min, all_time_min] = price_references(code, &interval_prices, prices);
        ranking.push_row(vec![
            (index + 1).into(),
            code.clone().into(),
            metrics.lineage.product_description.clone().into(),
            metrics.lineage.category.clone().into(),
            metrics.lineage.listing_code.clone().into(),
            metrics.months().into(),
            metrics.units.into(),
            money(metrics.revenue),
            metrics.orders().into(),
            money(metrics.ticket()),
            money(metrics.average_sold_price()),
            interval_min,
            all_time_min,
            returned.units_returned.into(),
            safe_divide(returned.units_returned, metrics.units).into(),
        ]);
    }

    let monthly = sales_by_period_product(&data.sales, &TotalsFilter::default());
    let mut detail = Table::new(DETAIL_COLUMNS);
    for (index, (code, _)) in ranked.iter().enumerate() {
        for ((period, _), metrics) in monthly.iter().filter(|((_, c), _)| c == code) {
            detail.push_row(vec![
                (index + 1).into(),
                period.to_string().into(),
                code.clone().into(),
                metrics.lineage.product_description.clone().into(),
                metrics.units.into(),
                metrics.orders().into(),
                money(metrics.revenue),
                money(metrics.average_sold_price()),
            ]);
        }
    }

    debug!("Top history: {} products ranked", ranking.len());

    let mut output = AnalysisOutput::new();
    output.insert("ranking", ranking);
    output.insert("monthly_detail", detail);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ReturnsSource;
    use crate::schema::{SalesRecord, YearMonth};

    fn sale(month: u32, code: &str, units: f64) -> SalesRecord {
        SalesRecord {
            period: YearMonth::new(2024, month),
            product_code: code.into(),
            invoice_number: format!("NF{}-{}", code, month),
            units_sold: Some(units),
            unit_price: Some(5.0),
            gross_revenue: units * 5.0,
            category: "Games".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_minimum_months_regardless_of_volume() {
        let sales = vec![
            sale(1, "BIG", 1000.0),
            sale(2, "BIG", 1000.0),
            sale(1, "STEADY", 1.0),
            sale(2, "STEADY", 1.0),
            sale(3, "STEADY", 1.0),
        ];
        let dataset = SalesDataset::new(sales, Vec::new(), ReturnsSource::Embedded);
        let prices = HistoricalPrices::from_sales(&dataset.sales);
        let output = build_top_history_analysis(&dataset, &TopHistoryConfig::default(), Some(&prices));

        let ranking = output.get("ranking").unwrap();
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking.value(0, "product_code"), Some(&Cell::Text("STEADY".into())));
        assert_eq!(ranking.value(0, "rank"), Some(&Cell::Int(1)));
        assert_eq!(ranking.value(0, "estimated_ticket"), Some(&Cell::Number(5.0)));
        assert_eq!(ranking.value(0, "all_time_min_price"), Some(&Cell::Number(5.0)));
        assert_eq!(output.get("monthly_detail").unwrap().len(), 3);
    }

    #[test]
    fn test_interval_average_price_weights_by_units() {
        let priced = |month: u32, units: f64, price: f64| SalesRecord {
            unit_price: Some(price),
            gross_revenue: units * price,
            ..sale(month, "MIX", units)
        };
        let dataset = SalesDataset::new(
            vec![priced(1, 10.0, 5.0), priced(2, 2.0, 20.0), priced(3, 8.0, 5.0)],
            Vec::new(),
            ReturnsSource::Embedded,
        );
        let output = build_top_history_analysis(&dataset, &TopHistoryConfig::default(), None);

        let ranking = output.get("ranking").unwrap();
        assert_eq!(ranking.value(0, "revenue"), Some(&Cell::Number(130.0)));
        assert_eq!(ranking.value(0, "interval_avg_price"), Some(&Cell::Number(6.5)));
        assert_eq!(ranking.value(0, "interval_min_price"), Some(&Cell::Number(5.0)));
    }

    #[test]
    fn test_orders_by_months_then_units_then_revenue() {
        let mut sales = Vec::new();
        for month in 1..=4 {
            sales.push(sale(month, "FOUR", 1.0));
        }
        for month in 1..=3 {
            sales.push(sale(month, "THREE_LOW", 10.0));
            sales.push(sale(month, "THREE_HIGH", 20.0));
        }
        let dataset = SalesDataset::new(sales, Vec::new(), ReturnsSource::Embedded);
        let config = TopHistoryConfig {
            rank_size: 2,
            ..Default::default()
        };
        let output = build_top_history_analysis(&dataset, &config, None);

        let ranking = output.get("ranking").unwrap();
        let codes: Vec<&Cell> = ranking.column_values("product_code");
        assert_eq!(
            codes,
            vec![&Cell::Text("FOUR".into()), &Cell::Text("THREE_HIGH".into())]
        );
        let detail = output.get("monthly_detail").unwrap();
        assert_eq!(detail.len(), 7);
        assert_eq!(detail.value(4, "rank"), Some(&Cell::Int(2)));
    }
}
