use super::{money, price_references};
use crate::aggregation::{sales_by_product, Lineage};
use crate::dataset::{min_unit_prices, HistoricalPrices, SalesDataset};
use crate::linkage::{dataset_linkage, PeriodBasis};
use crate::table::{AnalysisOutput, Cell, Table, TableRow};
use crate::utils::{desc, quantile, safe_divide};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LowCostConfig {
    pub category: Option<String>,
    /// Quantile of mean unit cost (0..=1) a product must not exceed.
    pub cost_percentile: f64,
    pub min_units: f64,
    pub max_return_rate: f64,
    /// Keep only the best `n` products. `None` keeps every selected product.
    pub rank_size: Option<usize>,
}

impl Default for LowCostConfig {
    fn default() -> Self {
        Self {
            category: None,
            cost_percentile: 0.25,
            min_units: 50.0,
            max_return_rate: 0.05,
            rank_size: None,
        }
    }
}

struct Recommendation {
    product_code: String,
    lineage: Lineage,
    mean_unit_cost: f64,
    cost_threshold: f64,
    units_sold: f64,
    orders: usize,
    revenue: f64,
    units_returned: f64,
    return_rate: f64,
    score: f64,
    prices: [Cell; 2],
}

impl TableRow for Recommendation {
    fn columns() -> &'static [&'static str] {
        &[
            "product_code",
            "product_description",
            "category",
            "listing_code",
            "mean_unit_cost",
            "cost_threshold",
            "units_sold",
            "orders",
            "revenue",
            "units_returned",
            "return_rate",
            "reputation_score",
            "interval_min_price",
            "all_time_min_price",
        ]
    }

    fn cells(&self) -> Vec<Cell> {
        let [interval_min, all_time_min] = self.prices.clone();
        vec![
            self.product_code.clone().into(),
            self.lineage.product_description.clone().into(),
            self.lineage.category.clone().into(),
            self.lineage.listing_code.clone().into(),
            money(self.mean_unit_cost),
            money(self.cost_threshold),
            self.units_sold.into(),
            self.orders.into(),
            money(self.revenue),
            self.units_returned.into(),
            self.return_rate.into(),
            self.score.into(),
            interval_min,
            all_time_min,
        ]
    }
}

/// Cheap products with a good track record: mean unit cost at or below the
/// configured percentile, enough volume and few returns. Ranked by
/// `(1 - return_rate) * units / max(unit_cost, 1)`.
///
/// Products without any unit cost are left out of both the percentile and
/// the selection.
pub fn build_low_cost_analysis(
    dataset: &SalesDataset,
    config: &LowCostConfig,
    prices: Option<&HistoricalPrices>,
) -> AnalysisOutput {
    let data = dataset.filter_category(config.category.as_deref());
    let linkage = dataset_linkage(&data, PeriodBasis::SalePeriod);
    let products = sales_by_product(&data.sales);

    let costs: Vec<f64> = products.values().filter_map(|m| m.mean_unit_cost()).collect();
    let Some(threshold) = quantile(&costs, config.cost_percentile) else {
        debug!("Low-cost analysis: no unit costs in scope");
        let mut output = AnalysisOutput::new();
        output.insert("recommended_products", Table::new(Recommendation::columns()));
        return output;
    };

    let interval_prices = min_unit_prices(data.sales.iter());
    let mut selected: Vec<Recommendation> = products
        .into_iter()
        .filter_map(|(product_code, metrics)| {
            let cost = metrics.mean_unit_cost()?;
            let returned = linkage.overall(&product_code);
            let return_rate = safe_divide(returned.units_returned, metrics.units);
            if cost > threshold || metrics.units < config.min_units || return_rate > config.max_return_rate {
                return None;
            }
            Some(Recommendation {
                score: (1.0 - return_rate) * metrics.units / cost.max(1.0),
                prices: price_references(&product_code, &interval_prices, prices),
                mean_unit_cost: cost,
                cost_threshold: threshold,
                units_sold: metrics.units,
                orders: metrics.orders(),
                revenue: metrics.revenue,
                units_returned: returned.units_returned,
                return_rate,
                lineage: metrics.lineage,
                product_code,
            })
        })
        .collect();

    selected.sort_by(|a, b| desc(a.score, b.score).then_with(|| a.product_code.cmp(&b.product_code)));
    if let Some(limit) = config.rank_size {
        selected.truncate(limit);
    }

    debug!(
        "Low-cost analysis: threshold {:.2}, {} products selected",
        threshold,
        selected.len()
    );

    let mut output = AnalysisOutput::new();
    output.insert("recommended_products", Table::from_rows(&selected));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ReturnsSource;
    use crate::schema::{SalesRecord, YearMonth};

    fn sale(code: &str, cost: Option<f64>, units: f64, returned: f64) -> SalesRecord {
        SalesRecord {
            period: YearMonth::new(2024, 1),
            product_code: code.into(),
            invoice_number: format!("NF{}", code),
            unit_cost: cost,
            unit_price: Some(20.0),
            units_sold: Some(units),
            gross_revenue: units * 20.0,
            units_returned: Some(returned),
            ..Default::default()
        }
    }

    #[test]
    fn test_products_above_the_cost_percentile_never_qualify() {
        let sales = vec![
            sale("CHEAP", Some(2.0), 100.0, 0.0),
            sale("MID", Some(4.0), 500.0, 0.0),
            sale("PRICEY", Some(10.0), 1000.0, 0.0),
            sale("LUXURY", Some(20.0), 1000.0, 0.0),
            sale("NOCOST", None, 1000.0, 0.0),
        ];
        let dataset = SalesDataset::new(sales, Vec::new(), ReturnsSource::Embedded);
        let config = LowCostConfig {
            cost_percentile: 0.5,
            ..Default::default()
        };
        let output = build_low_cost_analysis(&dataset, &config, None);
        let table = output.get("recommended_products").unwrap();

        let codes: Vec<&Cell> = table.column_values("product_code");
        assert_eq!(codes, vec![&Cell::Text("MID".into()), &Cell::Text("CHEAP".into())]);
        assert_eq!(table.value(0, "cost_threshold"), Some(&Cell::Number(7.0)));
        assert_eq!(table.value(0, "reputation_score"), Some(&Cell::Number(125.0)));
    }

    #[test]
    fn test_volume_floor_and_return_ceiling() {
        let sales = vec![
            sale("FEW", Some(1.0), 10.0, 0.0),
            sale("RETURNED", Some(1.0), 100.0, 10.0),
            sale("GOOD", Some(0.5), 100.0, 1.0),
        ];
        let dataset = SalesDataset::new(sales, Vec::new(), ReturnsSource::Embedded);
        let config = LowCostConfig {
            cost_percentile: 1.0,
            ..Default::default()
        };
        let output = build_low_cost_analysis(&dataset, &config, None);
        let table = output.get("recommended_products").unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.value(0, "product_code"), Some(&Cell::Text("GOOD".into())));
        // Costs below one are not allowed to inflate the score.
        let score = table.value(0, "reputation_score").unwrap().as_f64().unwrap();
        assert!((score - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_costs_gives_empty_table_with_schema() {
        let dataset = SalesDataset::new(vec![sale("X", None, 100.0, 0.0)], Vec::new(), ReturnsSource::Embedded);
        let output = build_low_cost_analysis(&dataset, &LowCostConfig::default(), None);
        let table = output.get("recommended_products").unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns()[0], "product_code");
    }
}
