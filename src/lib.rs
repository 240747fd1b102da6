//! # Sales Returns Analytics
//!
//! A library for turning multi-sheet sales and returns spreadsheet exports into
//! a normalized dataset and computing period-based commercial analytics on it.
//!
//! ## Core Concepts
//!
//! - **Sales sheets**: one or more sheets sharing a name prefix (`VENDA01`, `VENDA02`, ...),
//!   concatenated and normalized into [`SalesRecord`]s
//! - **Return sheets**: optional sheets (`DEVOLUCAO...`) normalized into [`ReturnRecord`]s;
//!   without them the in-row return columns of the sales sheets are used
//! - **Paired dataset**: [`SalesDataset`] keeps sales and returns together through every filter
//! - **Linkage**: returns join sales by `(period, product)` only, never by invoice
//! - **Pipelines**: return-rate flagging, demand-drop detection, historical top sellers,
//!   low-cost reputation scoring and product focus rollups, each returning named tables
//!
//! ## Example
//!
//! ```rust,ignore
//! use sales_returns_analytics::*;
//!
//! let config = EngineConfig::from_env();
//! let analytics = SalesAnalytics::load(&config)?;
//!
//! let request = AnalysisRequest::TopHistory(TopHistoryConfig {
//!     category: Some("Games".to_string()),
//!     ..Default::default()
//! });
//! let output = analytics.run(&request, None);
//! let ranking = output.get("ranking").unwrap();
//!
//! let args = parse_command_args("category=Games rank=10 window=3")?;
//! let potential = analytics.dispatch("potential_analysis", &args)?;
//! ```

pub mod aggregation;
pub mod analysis;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod frame;
pub mod ingestion;
pub mod linkage;
pub mod normalize;
pub mod period;
pub mod registry;
pub mod schema;
pub mod table;
pub mod utils;

pub use aggregation::{
    group_by, group_sales, group_totals, period_product_key, period_product_totals, sales_by_period_product,
    sales_by_product, sales_period_product_totals, GroupTotals, Lineage, Measures, PeriodProductTotals,
    SalesMetrics, TotalsFilter,
};
pub use analysis::*;
pub use cache::SnapshotCache;
pub use config::EngineConfig;
pub use dataset::{min_unit_prices, DateRange, HistoricalPrices, ReturnsSource, SalesDataset};
pub use error::{AnalyticsError, Result};
pub use frame::RawFrame;
pub use ingestion::*;
pub use linkage::{
    dataset_linkage, embedded_linkage, join_sales_returns, link, LinkageScope, PeriodBasis, ReturnLinkage,
    ReturnTotal, SalesReturnsRow,
};
pub use normalize::{normalize_margin, normalize_product_code, normalize_product_text};
pub use period::{cell_to_date, cell_to_period, parse_day_first_date, resolve_periods};
pub use registry::{parse_command_args, AnalysisCommand, AnalysisDefaults, AnalysisRegistry, CommandArgs};
pub use schema::*;
pub use table::{format_percentage_columns, AnalysisOutput, Cell, Table, TableRow};

use log::{debug, info};
use std::path::Path;

/// A loaded dataset ready to serve analyses.
///
/// Nothing is mutated after construction: every request filters into fresh
/// data, so one instance can be shared across threads.
#[derive(Debug, Clone)]
pub struct SalesAnalytics {
    dataset: SalesDataset,
    prices: HistoricalPrices,
    registry: AnalysisRegistry,
}

impl SalesAnalytics {
    pub fn load(config: &EngineConfig) -> Result<Self> {
        info!("Loading sales workbook {}", config.dataset_path.display());
        let dataset = SalesDataLoader::new(config.dataset_path.clone())
            .with_config(config.loader.clone())
            .load()?;
        Ok(Self::from_dataset(dataset, config))
    }

    pub fn from_dataset(dataset: SalesDataset, config: &EngineConfig) -> Self {
        let prices = HistoricalPrices::from_sales(&dataset.sales);
        debug!(
            "Dataset ready: {} sales rows, {} return rows, {} priced products",
            dataset.sales.len(),
            dataset.returns.len(),
            prices.len()
        );
        Self {
            dataset,
            prices,
            registry: AnalysisRegistry::new(config),
        }
    }

    pub fn dataset(&self) -> &SalesDataset {
        &self.dataset
    }

    /// All-time minimum prices over the full, unfiltered dataset.
    pub fn prices(&self) -> &HistoricalPrices {
        &self.prices
    }

    pub fn registry(&self) -> &AnalysisRegistry {
        &self.registry
    }

    /// Runs a typed request, optionally restricted to a date range first.
    pub fn run(&self, request: &AnalysisRequest, range: Option<&DateRange>) -> AnalysisOutput {
        match range.filter(|r| !r.is_unbounded()) {
            Some(range) => request.run(&self.dataset.filter_date_range(range), Some(&self.prices)),
            None => request.run(&self.dataset, Some(&self.prices)),
        }
    }

    /// Runs a registered command with `key=value` arguments.
    pub fn dispatch(&self, command: &str, args: &CommandArgs) -> Result<AnalysisOutput> {
        self.registry
            .dispatch(command, &self.dataset, Some(&self.prices), args)
    }
}

/// Loads `path` with the default loader settings and runs one request.
pub fn analyze_workbook(path: impl AsRef<Path>, request: &AnalysisRequest) -> Result<AnalysisOutput> {
    let config = EngineConfig {
        dataset_path: path.as_ref().to_path_buf(),
        ..Default::default()
    };
    let analytics = SalesAnalytics::load(&config)?;
    Ok(analytics.run(request, None))
}
