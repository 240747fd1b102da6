//! Command-name dispatch for the analysis pipelines.
//!
//! The registry is a plain value built once from an [`EngineConfig`] and
//! passed around by reference. Text arguments arrive as `key=value` pairs
//! and are turned into the typed pipeline configs before anything runs, so a
//! malformed request fails with an error while a valid one that matches no
//! rows returns empty tables.

use crate::analysis::{
    AnalysisRequest, LowCostConfig, PotentialAnalysisConfig, ProductFocusConfig, ReturnAnalysisConfig,
    TopHistoryConfig,
};
use crate::config::EngineConfig;
use crate::dataset::{DateRange, HistoricalPrices, SalesDataset};
use crate::error::{AnalyticsError, Result};
use crate::schema::YearMonth;
use crate::table::AnalysisOutput;
use log::debug;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Parsed `key=value` arguments. Keys are lower-cased.
pub type CommandArgs = BTreeMap<String, String>;

type RequestBuilder = fn(&AnalysisDefaults, &CommandArgs) -> Result<AnalysisRequest>;

/// Defaults applied when a command does not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisDefaults {
    pub rank_size: usize,
    pub recent_window: usize,
}

impl Default for AnalysisDefaults {
    fn default() -> Self {
        Self {
            rank_size: 20,
            recent_window: 3,
        }
    }
}

/// One registered command.
#[derive(Debug, Clone)]
pub struct AnalysisCommand {
    pub name: &'static str,
    pub description: &'static str,
    /// Accepted argument keys.
    pub params: &'static [&'static str],
    build: RequestBuilder,
}

impl AnalysisCommand {
    pub fn usage(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| format!("[{}=...]", p)).collect();
        format!("{} {}", self.name, params.join(" ")).trim_end().to_string()
    }
}

const RANGE_PARAMS: [&str; 2] = ["start", "end"];

#[derive(Debug, Clone)]
pub struct AnalysisRegistry {
    defaults: AnalysisDefaults,
    commands: BTreeMap<&'static str, AnalysisCommand>,
}

impl Default for AnalysisRegistry {
    fn default() -> Self {
        Self::with_defaults(AnalysisDefaults::default())
    }
}

impl AnalysisRegistry {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_defaults(AnalysisDefaults {
            rank_size: config.default_rank_size,
            recent_window: config.default_recent_window,
        })
    }

    pub fn with_defaults(defaults: AnalysisDefaults) -> Self {
        let commands = [
            AnalysisCommand {
                name: "return_analysis",
                description: "Months and products whose return rate reaches the threshold",
                params: &["category", "min_rate", "min_units", "start", "end"],
                build: build_return_request,
            },
            AnalysisCommand {
                name: "potential_analysis",
                description: "Products whose recent volume dropped below their historical level",
                params: &["category", "rank", "top", "window", "recent_periods", "min_months", "min_drop", "start", "end"],
                build: build_potential_request,
            },
            AnalysisCommand {
                name: "top_history",
                description: "Products that sold consistently across many months",
                params: &["category", "rank", "top", "min_months", "start", "end"],
                build: build_top_history_request,
            },
            AnalysisCommand {
                name: "low_cost_reputation",
                description: "Low-cost products with solid volume and few returns",
                params: &["category", "rank", "top", "percentile", "min_units", "max_return_rate", "start", "end"],
                build: build_low_cost_request,
            },
            AnalysisCommand {
                name: "product_focus",
                description: "Summary, daily and monthly views for a category or product list",
                params: &["category", "codes", "start", "end"],
                build: build_product_focus_request,
            },
        ]
        .into_iter()
        .map(|command| (command.name, command))
        .collect();

        Self { defaults, commands }
    }

    pub fn defaults(&self) -> AnalysisDefaults {
        self.defaults
    }

    pub fn get(&self, name: &str) -> Option<&AnalysisCommand> {
        self.commands.get(name.trim().to_lowercase().as_str())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.commands.keys().copied().collect()
    }

    pub fn commands(&self) -> impl Iterator<Item = &AnalysisCommand> {
        self.commands.values()
    }

    /// Validates `args` for `name` and builds the typed request plus the
    /// date range it should run over.
    pub fn request(&self, name: &str, args: &CommandArgs) -> Result<(AnalysisRequest, DateRange)> {
        let command = self
            .get(name)
            .ok_or_else(|| AnalyticsError::UnknownAnalysis(name.to_string()))?;
        if let Some(unknown) = args.keys().find(|k| !command.params.contains(&k.as_str())) {
            return Err(AnalyticsError::InvalidArgument {
                name: unknown.clone(),
                details: format!("not accepted by {} (usage: {})", command.name, command.usage()),
            });
        }

        let range = DateRange::parse(
            args.get(RANGE_PARAMS[0]).map(String::as_str),
            args.get(RANGE_PARAMS[1]).map(String::as_str),
        )?;
        let request = (command.build)(&self.defaults, args)?;
        Ok((request, range))
    }

    /// Runs the named command against `dataset`.
    pub fn dispatch(
        &self,
        name: &str,
        dataset: &SalesDataset,
        prices: Option<&HistoricalPrices>,
        args: &CommandArgs,
    ) -> Result<AnalysisOutput> {
        let (request, range) = self.request(name, args)?;
        debug!("Dispatching {} with {} argument(s)", request.name(), args.len());
        if range.is_unbounded() {
            Ok(request.run(dataset, prices))
        } else {
            Ok(request.run(&dataset.filter_date_range(&range), prices))
        }
    }
}

/// Splits `category=Games rank=10` style text into arguments. Keys are
/// lower-cased; a token without `=` is rejected.
pub fn parse_command_args(text: &str) -> Result<CommandArgs> {
    let mut args = CommandArgs::new();
    for token in text.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            return Err(AnalyticsError::InvalidArgument {
                name: token.to_string(),
                details: "expected key=value".to_string(),
            });
        };
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            return Err(AnalyticsError::InvalidArgument {
                name: token.to_string(),
                details: "empty key".to_string(),
            });
        }
        args.insert(key, value.trim().to_string());
    }
    Ok(args)
}

fn text_arg(args: &CommandArgs, key: &str) -> Option<String> {
    args.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parsed_arg<T: FromStr>(args: &CommandArgs, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match text_arg(args, key) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| AnalyticsError::InvalidArgument {
            name: key.to_string(),
            details: format!("'{}': {}", raw, e),
        }),
    }
}

/// `rank` wins over its `top` alias.
fn rank_arg(args: &CommandArgs, default: usize) -> Result<usize> {
    let rank = match parsed_arg::<usize>(args, "rank")? {
        Some(rank) => Some(rank),
        None => parsed_arg::<usize>(args, "top")?,
    };
    Ok(rank.unwrap_or(default))
}

/// A fraction given either as `0.25` or as a percentage like `25`.
fn fraction_arg(args: &CommandArgs, key: &str) -> Result<Option<f64>> {
    let value = parsed_arg::<f64>(args, key)?;
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(AnalyticsError::InvalidArgument {
            name: key.to_string(),
            details: format!("'{}' is not a valid fraction", v),
        }),
        Some(v) if v > 1.0 => Ok(Some(v / 100.0)),
        other => Ok(other),
    }
}

fn list_arg(args: &CommandArgs, key: &str) -> Vec<String> {
    text_arg(args, key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn build_return_request(_: &AnalysisDefaults, args: &CommandArgs) -> Result<AnalysisRequest> {
    let mut config = ReturnAnalysisConfig {
        category: text_arg(args, "category"),
        ..Default::default()
    };
    if let Some(rate) = fraction_arg(args, "min_rate")? {
        config.min_return_rate = rate;
    }
    if let Some(units) = parsed_arg::<f64>(args, "min_units")? {
        config.min_monthly_units = units;
    }
    Ok(AnalysisRequest::ReturnAnalysis(config))
}

fn build_potential_request(defaults: &AnalysisDefaults, args: &CommandArgs) -> Result<AnalysisRequest> {
    let recent_periods = list_arg(args, "recent_periods")
        .iter()
        .map(|p| YearMonth::parse(p))
        .collect::<Result<Vec<_>>>()?;
    let mut config = PotentialAnalysisConfig {
        category: text_arg(args, "category"),
        rank_size: rank_arg(args, defaults.rank_size)?,
        recent_window: parsed_arg(args, "window")?.unwrap_or(defaults.recent_window),
        recent_periods: (!recent_periods.is_empty()).then_some(recent_periods),
        ..Default::default()
    };
    if let Some(months) = parsed_arg(args, "min_months")? {
        config.min_hist_months = months;
    }
    if let Some(ratio) = fraction_arg(args, "min_drop")? {
        config.min_drop_ratio = ratio;
    }
    Ok(AnalysisRequest::PotentialAnalysis(config))
}

fn build_top_history_request(defaults: &AnalysisDefaults, args: &CommandArgs) -> Result<AnalysisRequest> {
    let mut config = TopHistoryConfig {
        category: text_arg(args, "category"),
        rank_size: rank_arg(args, defaults.rank_size)?,
        ..Default::default()
    };
    if let Some(months) = parsed_arg(args, "min_months")? {
        config.min_months = months;
    }
    Ok(AnalysisRequest::TopHistory(config))
}

fn build_low_cost_request(_: &AnalysisDefaults, args: &CommandArgs) -> Result<AnalysisRequest> {
    let mut config = LowCostConfig {
        category: text_arg(args, "category"),
        rank_size: match parsed_arg::<usize>(args, "rank")? {
            Some(rank) => Some(rank),
            None => parsed_arg::<usize>(args, "top")?,
        },
        ..Default::default()
    };
    if let Some(percentile) = fraction_arg(args, "percentile")? {
        config.cost_percentile = percentile;
    }
    if let Some(units) = parsed_arg::<f64>(args, "min_units")? {
        config.min_units = units;
    }
    if let Some(rate) = fraction_arg(args, "max_return_rate")? {
        config.max_return_rate = rate;
    }
    Ok(AnalysisRequest::LowCostReputation(config))
}

fn build_product_focus_request(_: &AnalysisDefaults, args: &CommandArgs) -> Result<AnalysisRequest> {
    Ok(AnalysisRequest::ProductFocus(ProductFocusConfig {
        category: text_arg(args, "category"),
        product_codes: list_arg(args, "codes"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(text: &str) -> CommandArgs {
        parse_command_args(text).unwrap()
    }

    #[test]
    fn test_parse_command_args() {
        let parsed = args("Category=Games  rank=5 codes=1,2");
        assert_eq!(parsed.get("category").map(String::as_str), Some("Games"));
        assert_eq!(parsed.get("rank").map(String::as_str), Some("5"));
        assert_eq!(parsed.len(), 3);

        assert!(matches!(
            parse_command_args("rank"),
            Err(AnalyticsError::InvalidArgument { .. })
        ));
        assert!(parse_command_args("").unwrap().is_empty());
    }

    #[test]
    fn test_registry_lists_all_commands() {
        let registry = AnalysisRegistry::default();
        assert_eq!(
            registry.names(),
            vec![
                "low_cost_reputation",
                "potential_analysis",
                "product_focus",
                "return_analysis",
                "top_history"
            ]
        );
        let usage = registry.get("product_focus").unwrap().usage();
        assert_eq!(usage, "product_focus [category=...] [codes=...] [start=...] [end=...]");
        assert!(registry.commands().all(|c| !c.description.is_empty()));
    }

    #[test]
    fn test_requests_use_registry_defaults() {
        let registry = AnalysisRegistry::with_defaults(AnalysisDefaults {
            rank_size: 7,
            recent_window: 2,
        });
        let (request, range) = registry.request("potential_analysis", &CommandArgs::new()).unwrap();
        match request {
            AnalysisRequest::PotentialAnalysis(config) => {
                assert_eq!(config.rank_size, 7);
                assert_eq!(config.recent_window, 2);
                assert!(config.recent_periods.is_none());
            }
            other => panic!("unexpected request {:?}", other),
        }
        assert!(range.is_unbounded());

        let (request, _) = registry
            .request("potential_analysis", &args("top=3 recent_periods=2024-05,2024-06"))
            .unwrap();
        match request {
            AnalysisRequest::PotentialAnalysis(config) => {
                assert_eq!(config.rank_size, 3);
                assert_eq!(
                    config.recent_periods,
                    Some(vec![YearMonth::new(2024, 5).unwrap(), YearMonth::new(2024, 6).unwrap()])
                );
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_percentages_and_fractions() {
        let registry = AnalysisRegistry::default();
        let (request, _) = registry
            .request("low_cost_reputation", &args("percentile=30 max_return_rate=0.1"))
            .unwrap();
        match request {
            AnalysisRequest::LowCostReputation(config) => {
                assert!((config.cost_percentile - 0.3).abs() < 1e-12);
                assert!((config.max_return_rate - 0.1).abs() < 1e-12);
                assert_eq!(config.rank_size, None);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_malformed_requests_are_errors() {
        let registry = AnalysisRegistry::default();
        let empty = SalesDataset::default();

        assert!(matches!(
            registry.dispatch("forecast", &empty, None, &CommandArgs::new()),
            Err(AnalyticsError::UnknownAnalysis(_))
        ));
        assert!(matches!(
            registry.dispatch("top_history", &empty, None, &args("rank=many")),
            Err(AnalyticsError::InvalidArgument { .. })
        ));
        assert!(matches!(
            registry.dispatch("top_history", &empty, None, &args("codes=1")),
            Err(AnalyticsError::InvalidArgument { .. })
        ));
        assert!(matches!(
            registry.dispatch("potential_analysis", &empty, None, &args("recent_periods=May")),
            Err(AnalyticsError::InvalidPeriod(_))
        ));
        assert!(matches!(
            registry.dispatch("product_focus", &empty, None, &args("start=yesterday")),
            Err(AnalyticsError::DateError(_))
        ));
    }

    #[test]
    fn test_valid_request_on_empty_data_returns_empty_tables() {
        let registry = AnalysisRegistry::default();
        let output = registry
            .dispatch("return_analysis", &SalesDataset::default(), None, &args("category=Games"))
            .unwrap();
        assert!(!output.is_empty());
        assert!(output.iter().all(|(_, table)| table.is_empty()));
    }
}
