//! The analysis pipelines. Each one takes a [`SalesDataset`] and a typed
//! config and returns named tables; none of them fails. A filter that leaves
//! no rows yields tables with their columns and no rows.
//!
//! Currency-like outputs are rounded to two decimals. Rates are left at full
//! precision; turning them into text is up to the caller (see
//! [`crate::table::format_percentage_columns`]).

pub mod low_cost;
pub mod potential;
pub mod product_focus;
pub mod returns;
pub mod top_history;

pub use low_cost::{build_low_cost_analysis, LowCostConfig};
pub use potential::{build_potential_analysis, PotentialAnalysisConfig, RecentWindow};
pub use product_focus::{build_product_focus_analysis, ProductFocusConfig};
pub use returns::{build_return_analysis, ReturnAnalysisConfig};
pub use top_history::{build_top_history_analysis, TopHistoryConfig};

use crate::dataset::{HistoricalPrices, SalesDataset};
use crate::table::{AnalysisOutput, Cell};
use crate::utils::round2;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A fully-typed analysis invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "analysis", rename_all = "snake_case")]
pub enum AnalysisRequest {
    ReturnAnalysis(ReturnAnalysisConfig),
    PotentialAnalysis(PotentialAnalysisConfig),
    TopHistory(TopHistoryConfig),
    LowCostReputation(LowCostConfig),
    ProductFocus(ProductFocusConfig),
}

impl AnalysisRequest {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisRequest::ReturnAnalysis(_) => "return_analysis",
            AnalysisRequest::PotentialAnalysis(_) => "potential_analysis",
            AnalysisRequest::TopHistory(_) => "top_history",
            AnalysisRequest::LowCostReputation(_) => "low_cost_reputation",
            AnalysisRequest::ProductFocus(_) => "product_focus",
        }
    }

    pub fn run(&self, dataset: &SalesDataset, prices: Option<&HistoricalPrices>) -> AnalysisOutput {
        match self {
            AnalysisRequest::ReturnAnalysis(config) => build_return_analysis(dataset, config),
            AnalysisRequest::PotentialAnalysis(config) => build_potential_analysis(dataset, config, prices),
            AnalysisRequest::TopHistory(config) => build_top_history_analysis(dataset, config, prices),
            AnalysisRequest::LowCostReputation(config) => build_low_cost_analysis(dataset, config, prices),
            AnalysisRequest::ProductFocus(config) => build_product_focus_analysis(dataset, config),
        }
    }
}

pub(crate) fn money(value: f64) -> Cell {
    Cell::Number(round2(value))
}

pub(crate) fn optional_money(value: Option<f64>) -> Cell {
    value.filter(|v| v.is_finite()).map(money).unwrap_or(Cell::Empty)
}

/// Interval and all-time minimum prices for one product.
pub(crate) fn price_references(
    product_code: &str,
    interval: &BTreeMap<String, f64>,
    all_time: Option<&HistoricalPrices>,
) -> [Cell; 2] {
    [
        optional_money(interval.get(product_code).copied()),
        optional_money(all_time.and_then(|p| p.get(product_code))),
    ]
}
