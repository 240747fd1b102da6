use super::{money, optional_money, price_references};
use crate::aggregation::{sales_by_period_product, Lineage, SalesMetrics, TotalsFilter};
use crate::dataset::{min_unit_prices, HistoricalPrices, SalesDataset};
use crate::linkage::{dataset_linkage, PeriodBasis, ReturnTotal};
use crate::schema::YearMonth;
use crate::table::{AnalysisOutput, Cell, Table, TableRow};
use crate::utils::{desc, mean, median, safe_divide};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PotentialAnalysisConfig {
    pub category: Option<String>,
    pub rank_size: usize,
    /// Number of trailing months treated as "recent" when no explicit list is given.
    pub recent_window: usize,
    /// Explicit recent months. Takes precedence over `recent_window` when non-empty.
    pub recent_periods: Option<Vec<YearMonth>>,
    pub min_hist_months: usize,
    pub min_drop_ratio: f64,
    pub max_recent_return_rate: f64,
}

impl Default for PotentialAnalysisConfig {
    fn default() -> Self {
        Self {
            category: None,
            rank_size: 20,
            recent_window: 3,
            recent_periods: None,
            min_hist_months: 3,
            min_drop_ratio: 0.3,
            max_recent_return_rate: 0.2,
        }
    }
}

impl PotentialAnalysisConfig {
    pub fn window(&self) -> RecentWindow {
        match &self.recent_periods {
            Some(periods) if !periods.is_empty() => RecentWindow::Explicit(periods.clone()),
            _ => RecentWindow::LastN(self.recent_window),
        }
    }
}

/// How the observed months are split into a recent and a historical window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecentWindow {
    /// The last `n` observed months. When there are no more than `n` months,
    /// the window shrinks to half of them (at least one).
    LastN(usize),
    /// Exactly these months, intersected with the observed ones.
    Explicit(Vec<YearMonth>),
}

impl RecentWindow {
    /// Returns `(recent, historical)`, or `None` when either side would be
    /// empty.
    pub fn split(&self, observed: &BTreeSet<YearMonth>) -> Option<(BTreeSet<YearMonth>, BTreeSet<YearMonth>)> {
        let recent: BTreeSet<YearMonth> = match self {
            RecentWindow::LastN(n) => {
                let mut n = (*n).max(1);
                if observed.len() <= n {
                    n = (observed.len() / 2).max(1);
                }
                observed.iter().rev().take(n).copied().collect()
            }
            RecentWindow::Explicit(periods) => periods.iter().filter(|p| observed.contains(p)).copied().collect(),
        };
        let historical: BTreeSet<YearMonth> = observed.difference(&recent).copied().collect();
        if recent.is_empty() || historical.is_empty() {
            return None;
        }
        Some((recent, historical))
    }
}

/// Monthly means over the months of one window in which the product sold.
#[derive(Debug, Clone, Default)]
struct WindowStats {
    units: Vec<f64>,
    revenue: Vec<f64>,
    orders: Vec<f64>,
    return_rates: Vec<f64>,
    margins: Vec<f64>,
    min_price: Option<f64>,
}

impl WindowStats {
    fn add(&mut self, metrics: &SalesMetrics, returned: &ReturnTotal) {
        self.units.push(metrics.units);
        self.revenue.push(metrics.revenue);
        self.orders.push(metrics.orders() as f64);
        self.return_rates.push(safe_divide(returned.units_returned, metrics.units));
        if let Some(margin) = metrics.mean_margin() {
            self.margins.push(margin);
        }
        if let Some(price) = metrics.min_price() {
            self.min_price = Some(self.min_price.map_or(price, |p| p.min(price)));
        }
    }

    fn months(&self) -> usize {
        self.units.len()
    }

    fn mean_units(&self) -> f64 {
        mean(&self.units).unwrap_or(0.0)
    }

    fn mean_revenue(&self) -> f64 {
        mean(&self.revenue).unwrap_or(0.0)
    }

    fn mean_orders(&self) -> f64 {
        mean(&self.orders).unwrap_or(0.0)
    }

    fn return_rate(&self) -> f64 {
        mean(&self.return_rates).unwrap_or(0.0)
    }

    fn mean_margin(&self) -> Option<f64> {
        mean(&self.margins)
    }
}

#[derive(Default)]
struct ProductWindows {
    lineage: Lineage,
    historical: WindowStats,
    recent: WindowStats,
}

struct Candidate {
    product_code: String,
    lineage: Lineage,
    historical: WindowStats,
    recent: WindowStats,
    units_drop: f64,
    drop_pct: f64,
    score: f64,
    prices: [Cell; 2],
}

impl TableRow for Candidate {
    fn columns() -> &'static [&'static str] {
        &[
            "product_code",
            "product_description",
            "category",
            "listing_code",
            "hist_months",
            "recent_months",
            "hist_mean_units",
            "recent_mean_units",
            "units_drop",
            "drop_pct",
            "hist_mean_revenue",
            "recent_mean_revenue",
            "hist_mean_orders",
            "recent_mean_orders",
            "hist_return_rate",
            "recent_return_rate",
            "hist_mean_margin",
            "recent_mean_margin",
            "hist_min_price",
            "recent_min_price",
            "interval_min_price",
            "all_time_min_price",
            "score",
        ]
    }

    fn cells(&self) -> Vec<Cell> {
        let [interval_min, all_time_min] = self.prices.clone();
        vec![
            self.product_code.clone().into(),
            self.lineage.product_description.clone().into(),
            self.lineage.category.clone().into(),
            self.lineage.listing_code.clone().into(),
            self.historical.months().into(),
            self.recent.months().into(),
            self.historical.mean_units().into(),
            self.recent.mean_units().into(),
            self.units_drop.into(),
            self.drop_pct.into(),
            money(self.historical.mean_revenue()),
            money(self.recent.mean_revenue()),
            self.historical.mean_orders().into(),
            self.recent.mean_orders().into(),
            self.historical.return_rate().into(),
            self.recent.return_rate().into(),
            self.historical.mean_margin().into(),
            self.recent.mean_margin().into(),
            optional_money(self.historical.min_price),
            optional_money(self.recent.min_price),
            interval_min,
            all_time_min,
            self.score.into(),
        ]
    }
}

struct HistoryRow {
    period: YearMonth,
    window: &'static str,
    product_code: String,
    product_description: String,
    units_sold: f64,
    orders: usize,
    revenue: f64,
    average_sold_price: f64,
    units_returned: f64,
    return_rate: f64,
    prices: [Cell; 2],
}

impl TableRow for HistoryRow {
    fn columns() -> &'static [&'static str] {
        &[
            "period",
            "window",
            "product_code",
            "product_description",
            "units_sold",
            "orders",
            "revenue",
            "average_sold_price",
            "units_returned",
            "return_rate",
            "interval_min_price",
            "all_time_min_price",
        ]
    }

    fn cells(&self) -> Vec<Cell> {
        let [interval_min, all_time_min] = self.prices.clone();
        vec![
            self.period.to_string().into(),
            self.window.into(),
            self.product_code.clone().into(),
            self.product_description.clone().into(),
            self.units_sold.into(),
            self.orders.into(),
            money(self.revenue),
            money(self.average_sold_price),
            self.units_returned.into(),
            self.return_rate.into(),
            interval_min,
            all_time_min,
        ]
    }
}

fn empty_output() -> AnalysisOutput {
    let mut output = AnalysisOutput::new();
    output.insert("candidates", Table::new(Candidate::columns()));
    output.insert("monthly_history", Table::new(HistoryRow::columns()));
    output
}

/// Finds products whose recent monthly volume dropped well below their
/// historical level and ranks them by how much volume there is to recover.
///
/// A product is a candidate when it sold in at least `min_hist_months`
/// historical months, its historical mean is at least the median historical
/// mean of the eligible products, the relative drop reaches `min_drop_ratio`
/// and the recent return rate stays at or below `max_recent_return_rate`.
/// The score is `max(0, drop) * hist_months * (1 - hist_return_rate)`.
pub fn build_potential_analysis(
    dataset: &SalesDataset,
    config: &PotentialAnalysisConfig,
    prices: Option<&HistoricalPrices>,
) -> AnalysisOutput {
    let data = dataset.filter_category(config.category.as_deref());
    let Some((recent, historical)) = config.window().split(&data.sale_periods()) else {
        debug!("Potential analysis: not enough months to split the windows");
        return empty_output();
    };

    let linkage = dataset_linkage(&data, PeriodBasis::SalePeriod);
    let monthly = sales_by_period_product(&data.sales, &TotalsFilter::default());

    let mut products: BTreeMap<String, ProductWindows> = BTreeMap::new();
    for ((period, code), metrics) in &monthly {
        let returned = linkage.monthly(*period, code);
        let entry = products.entry(code.clone()).or_default();
        if recent.contains(period) {
            entry.recent.add(metrics, &returned);
        } else if historical.contains(period) {
            entry.historical.add(metrics, &returned);
        }
        if entry.lineage == Lineage::default() {
            entry.lineage = metrics.lineage.clone();
        }
    }
    // Products that only sold in the recent window have no history to drop from.
    products.retain(|_, p| p.historical.months() > 0);

    let hist_means: Vec<f64> = products
        .values()
        .filter(|p| p.historical.months() >= config.min_hist_months)
        .map(|p| p.historical.mean_units())
        .collect();
    let reference = median(&hist_means)
        .or_else(|| {
            let all: Vec<f64> = products.values().map(|p| p.historical.mean_units()).collect();
            median(&all)
        })
        .unwrap_or(0.0);

    let interval_prices = min_unit_prices(data.sales.iter());
    let mut candidates: Vec<Candidate> = products
        .into_iter()
        .filter_map(|(product_code, p)| {
            let hist_mean = p.historical.mean_units();
            let units_drop = hist_mean - p.recent.mean_units();
            let drop_pct = safe_divide(units_drop, hist_mean);
            let qualifies = p.historical.months() >= config.min_hist_months
                && hist_mean >= reference
                && drop_pct >= config.min_drop_ratio
                && p.recent.return_rate() <= config.max_recent_return_rate;
            if !qualifies {
                return None;
            }
            let score = units_drop.max(0.0) * p.historical.months() as f64 * (1.0 - p.historical.return_rate());
            Some(Candidate {
                prices: price_references(&product_code, &interval_prices, prices),
                product_code,
                lineage: p.lineage,
                historical: p.historical,
                recent: p.recent,
                units_drop,
                drop_pct,
                score,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        desc(a.score, b.score)
            .then_with(|| desc(a.drop_pct, b.drop_pct))
            .then_with(|| desc(a.historical.mean_units(), b.historical.mean_units()))
            .then_with(|| a.product_code.cmp(&b.product_code))
    });
    candidates.truncate(config.rank_size);

    let mut history = Vec::new();
    for candidate in &candidates {
        let rows = monthly.iter().filter(|((_, code), _)| *code == candidate.product_code);
        for ((period, code), metrics) in rows {
            let returned = linkage.monthly(*period, code);
            history.push(HistoryRow {
                period: *period,
                window: if recent.contains(period) { "recent" } else { "historical" },
                product_code: code.clone(),
                product_description: metrics.lineage.product_description.clone(),
                units_sold: metrics.units,
                orders: metrics.orders(),
                revenue: metrics.revenue,
                average_sold_price: metrics.average_sold_price(),
                units_returned: returned.units_returned,
                return_rate: safe_divide(returned.units_returned, metrics.units),
                prices: candidate.prices.clone(),
            });
        }
    }

    debug!(
        "Potential analysis: {} recent and {} historical months, {} candidates",
        recent.len(),
        historical.len(),
        candidates.len()
    );

    let mut output = AnalysisOutput::new();
    output.insert("candidates", Table::from_rows(&candidates));
    output.insert("monthly_history", Table::from_rows(&history));
    output
}
