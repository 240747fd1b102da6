use crate::cache::SnapshotCache;
use crate::dataset::{ReturnsSource, SalesDataset};
use crate::error::{AnalyticsError, Result};
use crate::frame::RawFrame;
use crate::normalize::{normalize_margin, normalize_product_code};
use crate::period::{cell_to_date, resolve_periods};
use crate::schema::{
    columns, CellValue, ReturnRecord, SalesRecord, RETURNS_COLUMN_MAP, SALES_COLUMN_MAP,
    UNCATEGORIZED,
};
use crate::utils::{finite_or_zero, natural_cmp, safe_divide};
use calamine::{open_workbook_auto, Data, Reader, Sheets};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// Receives `(processed, total)` row counts while a workbook loads.
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LoaderConfig {
    /// Sales sheets: `VENDA`, `VENDA01`, `VENDA_2`, ...
    pub sales_sheet_prefix: String,
    /// Return sheets. `None` disables the lookup.
    pub returns_sheet_prefix: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub enable_cache: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            sales_sheet_prefix: "VENDA".to_string(),
            returns_sheet_prefix: Some("DEVOLUCAO".to_string()),
            cache_dir: Some(PathBuf::from(".cache")),
            enable_cache: true,
        }
    }
}

/// Anything that can list sheets and hand back their contents as frames with
/// the first row used as the header.
pub trait WorkbookSource {
    fn sheet_names(&self) -> Vec<String>;
    fn read_sheet(&mut self, name: &str) -> Result<RawFrame>;
}

/// `.xlsx`, `.xls`, `.xlsb` and `.ods` files read through calamine.
pub struct ExcelWorkbook {
    inner: Sheets<BufReader<File>>,
}

impl ExcelWorkbook {
    pub fn open(path: &Path) -> Result<Self> {
        let inner = open_workbook_auto(path)
            .map_err(|e| AnalyticsError::Workbook(format!("{}: {}", path.display(), e)))?;
        Ok(Self { inner })
    }
}

impl WorkbookSource for ExcelWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.inner.sheet_names()
    }

    fn read_sheet(&mut self, name: &str) -> Result<RawFrame> {
        let range = self
            .inner
            .worksheet_range(name)
            .map_err(|e| AnalyticsError::Workbook(format!("sheet '{}': {}", name, e)))?;

        let mut rows = range.rows();
        let header: Vec<String> = match rows.next() {
            Some(cells) => cells.iter().map(|c| data_to_cell(c).to_text()).collect(),
            None => return Ok(RawFrame::default()),
        };

        let mut frame = RawFrame::new(header);
        for row in rows {
            let cells: Vec<CellValue> = row.iter().map(data_to_cell).collect();
            if cells.iter().all(CellValue::is_empty) {
                continue;
            }
            frame.push_row(cells);
        }
        Ok(frame)
    }
}

fn data_to_cell(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) if value.time() == chrono::NaiveTime::MIN => CellValue::Date(value.date()),
            Some(value) => CellValue::DateTime(value),
            None => CellValue::float(dt.as_f64()),
        },
        Data::DateTimeIso(text) => parse_iso_cell(text),
        Data::DurationIso(text) => CellValue::Text(text.clone()),
    }
}

fn parse_iso_cell(text: &str) -> CellValue {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return CellValue::Date(date);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return CellValue::DateTime(dt);
        }
    }
    CellValue::Text(text.to_string())
}

/// An in-memory workbook, handy for tests and for callers that already hold
/// sheet data.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkbook {
    sheets: Vec<(String, RawFrame)>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, name: &str, headers: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        let headers = headers.iter().map(|h| h.to_string()).collect();
        self.sheets
            .push((name.to_string(), RawFrame::from_rows(headers, rows)));
        self
    }
}

impl WorkbookSource for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn read_sheet(&mut self, name: &str) -> Result<RawFrame> {
        self.sheets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, frame)| frame.clone())
            .ok_or_else(|| AnalyticsError::Workbook(format!("sheet '{}' not found", name)))
    }
}

/// The sheet named exactly `prefix` when the workbook has one. Otherwise the
/// sheets named `prefix` plus a numeric suffix (with an optional `_`, `-` or
/// space before it), in natural order. Names compare case-insensitively.
pub fn resolve_sheet_names(available: &[String], prefix: &str) -> Vec<String> {
    let prefix = prefix.trim().to_lowercase();
    if prefix.is_empty() {
        return Vec::new();
    }

    if let Some(exact) = available
        .iter()
        .find(|name| name.trim().to_lowercase() == prefix)
    {
        return vec![exact.clone()];
    }

    let mut matches: Vec<String> = available
        .iter()
        .filter(|name| {
            let lowered = name.trim().to_lowercase();
            let Some(rest) = lowered.strip_prefix(&prefix) else {
                return false;
            };
            let digits = rest.trim_start_matches(['_', '-', ' ']);
            !digits.is_empty()
                && rest.len() - digits.len() <= 1
                && digits.chars().all(|c| c.is_ascii_digit())
        })
        .cloned()
        .collect();
    matches.sort_by(|a, b| natural_cmp(a, b));
    matches
}

/// Reads the sales and return sheets of one workbook into a normalized
/// [`SalesDataset`], reusing an on-disk snapshot when one is fresh.
pub struct SalesDataLoader {
    path: PathBuf,
    config: LoaderConfig,
    progress: Option<ProgressCallback>,
}

impl SalesDataLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: LoaderConfig::default(),
            progress: None,
        }
    }

    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn load(&self) -> Result<SalesDataset> {
        if !self.path.exists() {
            return Err(AnalyticsError::SourceNotFound(self.path.clone()));
        }
        let mut workbook = ExcelWorkbook::open(&self.path)?;
        self.load_from(&mut workbook)
    }

    /// Loads from an already-open workbook. The loader's path is still used
    /// to name and validate the snapshot cache.
    pub fn load_from<W: WorkbookSource>(&self, workbook: &mut W) -> Result<SalesDataset> {
        let available = workbook.sheet_names();
        let sales_sheets = resolve_sheet_names(&available, &self.config.sales_sheet_prefix);
        if sales_sheets.is_empty() {
            return Err(AnalyticsError::NoMatchingSheet {
                prefix: self.config.sales_sheet_prefix.clone(),
                available,
            });
        }
        let return_sheets = self
            .config
            .returns_sheet_prefix
            .as_deref()
            .map(|prefix| resolve_sheet_names(&available, prefix))
            .unwrap_or_default();

        info!(
            "Resolved sales sheets {:?} and return sheets {:?}",
            sales_sheets, return_sheets
        );

        let signature_sheets: Vec<String> = sales_sheets
            .iter()
            .chain(return_sheets.iter())
            .cloned()
            .collect();
        let cache = self.cache();
        if let Some(cache) = &cache {
            if let Some(dataset) = cache.load(&self.path, &signature_sheets) {
                info!(
                    "Loaded {} sales rows and {} return rows from snapshot",
                    dataset.sales.len(),
                    dataset.returns.len()
                );
                self.notify(1, 1);
                return Ok(dataset);
            }
        }

        let sales_frame = self.read_family(workbook, &sales_sheets, SALES_COLUMN_MAP)?;
        let returns_frame = self.read_family(workbook, &return_sheets, RETURNS_COLUMN_MAP)?;

        let total = (sales_frame.len() + returns_frame.len()).max(1);
        self.notify(0, total);
        let mut processed = 0;
        let mut tick = || {
            processed += 1;
            self.notify(processed, total);
        };

        let sales = build_sales_records(&sales_frame, &mut tick);
        let returns = build_return_records(&returns_frame, &mut tick);
        self.notify(total, total);

        let returns_source = if return_sheets.is_empty() {
            ReturnsSource::Embedded
        } else {
            ReturnsSource::ReturnSheets
        };
        info!(
            "Loaded {} sales rows and {} return rows ({:?} returns)",
            sales.len(),
            returns.len(),
            returns_source
        );

        let dataset = SalesDataset::new(sales, returns, returns_source);
        if let Some(cache) = &cache {
            cache.store(&self.path, &signature_sheets, &dataset);
        }
        Ok(dataset)
    }

    fn cache(&self) -> Option<SnapshotCache> {
        if !self.config.enable_cache {
            return None;
        }
        self.config.cache_dir.as_ref().map(SnapshotCache::new)
    }

    fn read_family<W: WorkbookSource>(
        &self,
        workbook: &mut W,
        sheets: &[String],
        mapping: &[(&str, &str)],
    ) -> Result<RawFrame> {
        let mut frames = Vec::with_capacity(sheets.len());
        for name in sheets {
            let frame = workbook.read_sheet(name)?.rename_columns(mapping);
            debug!("Sheet '{}' has {} rows", name, frame.len());
            frames.push(frame);
        }
        Ok(RawFrame::concat(frames))
    }

    fn notify(&self, processed: usize, total: usize) {
        let Some(callback) = &self.progress else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(processed, total))).is_err() {
            warn!("Progress callback panicked at {}/{}; loading continues", processed, total);
        }
    }
}

/// Loads `path` with the default configuration.
pub fn load_sales_dataset(path: impl Into<PathBuf>) -> Result<SalesDataset> {
    SalesDataLoader::new(path).load()
}

/// Parses a numeric cell. Percent signs and spaces are stripped and comma
/// decimals accepted (`"12,5%"`, `"1.234,56"`); anything else is missing.
pub fn parse_numeric(cell: &CellValue) -> Option<f64> {
    let value = match cell {
        CellValue::Int(v) => *v as f64,
        CellValue::Float(v) => *v,
        CellValue::Text(text) => {
            let cleaned: String = text
                .chars()
                .filter(|c| *c != '%' && !c.is_whitespace())
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
                (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
                (Some(_), Some(_)) => cleaned.replace(',', ""),
                (Some(_), None) => cleaned.replace(',', "."),
                _ => cleaned,
            };
            normalized.parse::<f64>().ok()?
        }
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Column accessor over one frame, resolved once per frame.
struct Columns<'a> {
    frame: &'a RawFrame,
    known: Vec<bool>,
}

impl<'a> Columns<'a> {
    fn new(frame: &'a RawFrame, mapping: &[(&str, &str)]) -> Self {
        let known = frame
            .columns()
            .iter()
            .map(|c| mapping.iter().any(|(_, target)| target == c))
            .collect();
        Self { frame, known }
    }

    fn cell<'r>(&self, row: &'r [CellValue], name: &str) -> &'r CellValue {
        const EMPTY: &CellValue = &CellValue::Empty;
        self.frame
            .column_index(name)
            .and_then(|i| row.get(i))
            .unwrap_or(EMPTY)
    }

    fn text(&self, row: &[CellValue], name: &str) -> String {
        self.cell(row, name).to_text()
    }

    fn number(&self, row: &[CellValue], name: &str) -> Option<f64> {
        parse_numeric(self.cell(row, name))
    }

    fn date(&self, row: &[CellValue], name: &str) -> Option<NaiveDate> {
        cell_to_date(self.cell(row, name))
    }

    fn extra(&self, row: &[CellValue]) -> BTreeMap<String, CellValue> {
        self.frame
            .columns()
            .iter()
            .zip(row.iter())
            .zip(self.known.iter())
            .filter(|((_, cell), known)| !**known && !cell.is_empty())
            .map(|((name, cell), _)| (name.clone(), cell.clone()))
            .collect()
    }
}

fn category_or_default(raw: String) -> String {
    if raw.is_empty() {
        UNCATEGORIZED.to_string()
    } else {
        raw
    }
}

fn build_sales_records(frame: &RawFrame, tick: &mut dyn FnMut()) -> Vec<SalesRecord> {
    let periods = resolve_periods(frame, columns::PERIOD, Some(columns::DATE));
    let cols = Columns::new(frame, SALES_COLUMN_MAP);

    frame
        .rows()
        .iter()
        .zip(periods)
        .map(|(row, period)| {
            let units_sold = cols.number(row, columns::UNITS_SOLD).map(|u| u.max(0.0));
            let unit_price = cols.number(row, columns::UNIT_PRICE);
            let unit_cost = cols.number(row, columns::UNIT_COST);
            let margin_fraction = cols.number(row, columns::MARGIN_PERCENTAGE).map(normalize_margin);
            let units_returned = cols.number(row, columns::UNITS_RETURNED).map(|u| u.max(0.0));
            let recorded_revenue = cols.number(row, columns::GROSS_REVENUE).unwrap_or(0.0);

            let units = units_sold.unwrap_or(0.0);
            let computed_revenue = finite_or_zero(unit_price.unwrap_or(0.0) * units);
            let gross_revenue = if recorded_revenue > 0.0 {
                recorded_revenue
            } else {
                computed_revenue
            };

            let record = SalesRecord {
                date: cols.date(row, columns::DATE),
                period,
                invoice_number: cols.text(row, columns::INVOICE_NUMBER),
                category: category_or_default(cols.text(row, columns::CATEGORY)),
                product_code: normalize_product_code(cols.cell(row, columns::PRODUCT_CODE)),
                product_description: cols.text(row, columns::PRODUCT_DESCRIPTION),
                manufacturer_code: cols.text(row, columns::MANUFACTURER_CODE),
                listing_code: cols.text(row, columns::LISTING_CODE),
                listing_type: cols.text(row, columns::LISTING_TYPE),
                unit_cost,
                unit_price,
                units_sold,
                order_count: cols.number(row, columns::ORDER_COUNT),
                margin_fraction,
                gross_revenue,
                computed_revenue,
                cost_total: finite_or_zero(unit_cost.unwrap_or(0.0) * units),
                estimated_gross_profit: finite_or_zero(computed_revenue * margin_fraction.unwrap_or(0.0)),
                units_returned,
                returned_revenue: cols.number(row, columns::RETURNED_REVENUE),
                return_rate: safe_divide(units_returned.unwrap_or(0.0), units),
                extra: cols.extra(row),
            };
            tick();
            record
        })
        .collect()
}

fn build_return_records(frame: &RawFrame, tick: &mut dyn FnMut()) -> Vec<ReturnRecord> {
    let sale_periods = resolve_periods(frame, columns::SALE_PERIOD, Some(columns::SALE_DATE));
    let return_periods = resolve_periods(frame, columns::RETURN_PERIOD, Some(columns::RETURN_DATE));
    let cols = Columns::new(frame, RETURNS_COLUMN_MAP);

    frame
        .rows()
        .iter()
        .zip(sale_periods.into_iter().zip(return_periods))
        .map(|(row, (sale_period, return_period))| {
            let record = ReturnRecord {
                sale_date: cols.date(row, columns::SALE_DATE),
                return_date: cols.date(row, columns::RETURN_DATE),
                sale_period,
                return_period,
                sale_invoice_number: cols.text(row, columns::SALE_INVOICE),
                return_invoice_number: cols.text(row, columns::RETURN_INVOICE),
                category: category_or_default(cols.text(row, columns::CATEGORY)),
                product_code: normalize_product_code(cols.cell(row, columns::PRODUCT_CODE)),
                product_description: cols.text(row, columns::PRODUCT_DESCRIPTION),
                listing_code: cols.text(row, columns::LISTING_CODE),
                units_returned: cols.number(row, columns::UNITS_RETURNED).map(|u| u.max(0.0)),
                returned_revenue: cols.number(row, columns::RETURNED_REVENUE),
                extra: cols.extra(row),
            };
            tick();
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::YearMonth;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sales_workbook() -> MemoryWorkbook {
        MemoryWorkbook::new().with_sheet(
            "VENDA",
            &[
                "ANO_MES",
                "DATA",
                "NR_NOTA_FISCAL",
                "CATEGORIA",
                "CD_PRODUTO",
                "Qtd de sku no pedido",
                "ROB",
                "Preco vendido",
                "Perc Margem Bruta% RBLD",
                "Custo do produto",
                "Qtd Produto Devolvido",
                "Canal",
            ],
            vec![
                vec![
                    "202401".into(),
                    "15/01/2024".into(),
                    "NF1".into(),
                    "Games".into(),
                    123.0.into(),
                    "4".into(),
                    "0".into(),
                    "10,50".into(),
                    "35%".into(),
                    "6".into(),
                    "1".into(),
                    "web".into(),
                ],
                vec![
                    CellValue::Empty,
                    "20/02/2024".into(),
                    "NF2".into(),
                    CellValue::Empty,
                    "123.0".into(),
                    "-3".into(),
                    "50".into(),
                    "n/a".into(),
                    "0.2".into(),
                    CellValue::Empty,
                    CellValue::Empty,
                    CellValue::Empty,
                ],
            ],
        )
    }

    fn loader() -> SalesDataLoader {
        SalesDataLoader::new("missing.xlsx").with_config(LoaderConfig {
            enable_cache: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_resolve_sheet_names() {
        let available = names(&["Resumo", "venda10", "VENDA2", "VENDA", "VENDAS", "VENDA_3", "DEVOLUCAO01"]);
        assert_eq!(resolve_sheet_names(&available, "VENDA"), names(&["VENDA"]));
        assert_eq!(resolve_sheet_names(&available, "DEVOLUCAO"), names(&["DEVOLUCAO01"]));
        assert!(resolve_sheet_names(&available, "ESTOQUE").is_empty());
    }

    #[test]
    fn test_exact_sheet_wins_over_numbered_parts() {
        let consolidated = names(&["VENDA01", "venda", "VENDA02"]);
        assert_eq!(resolve_sheet_names(&consolidated, "VENDA"), names(&["venda"]));

        let parts = names(&["Resumo", "venda10", "VENDA2", "VENDAS", "VENDA_3"]);
        assert_eq!(
            resolve_sheet_names(&parts, "VENDA"),
            names(&["VENDA2", "venda10", "VENDA_3"])
        );
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric(&"12,5%".into()), Some(12.5));
        assert_eq!(parse_numeric(&"1.234,56".into()), Some(1234.56));
        assert_eq!(parse_numeric(&"1,234.56".into()), Some(1234.56));
        assert_eq!(parse_numeric(&" 7 ".into()), Some(7.0));
        assert_eq!(parse_numeric(&"abc".into()), None);
        assert_eq!(parse_numeric(&"".into()), None);
        assert_eq!(parse_numeric(&CellValue::Int(3)), Some(3.0));
    }

    #[test]
    fn test_load_normalizes_sales_rows() {
        let dataset = loader().load_from(&mut sales_workbook()).unwrap();
        assert_eq!(dataset.returns_source, ReturnsSource::Embedded);
        assert_eq!(dataset.sales.len(), 2);

        let first = &dataset.sales[0];
        assert_eq!(first.product_code, "123");
        assert_eq!(first.period, YearMonth::new(2024, 1));
        assert_eq!(first.unit_price, Some(10.5));
        assert!((first.margin_fraction.unwrap() - 0.35).abs() < 1e-12);
        assert!((first.gross_revenue - 42.0).abs() < 1e-9);
        assert!((first.cost_total - 24.0).abs() < 1e-9);
        assert!((first.estimated_gross_profit - 14.7).abs() < 1e-9);
        assert!((first.return_rate - 0.25).abs() < 1e-12);
        assert_eq!(first.extra.get("canal"), Some(&CellValue::Text("web".into())));

        let second = &dataset.sales[1];
        assert_eq!(second.product_code, "123");
        assert_eq!(second.category, UNCATEGORIZED);
        assert_eq!(second.period, YearMonth::new(2024, 2));
        assert_eq!(second.units_sold, Some(0.0));
        assert_eq!(second.unit_price, None);
        assert_eq!(second.gross_revenue, 50.0);
        assert_eq!(second.estimated_gross_profit, 0.0);
        assert_eq!(second.return_rate, 0.0);
    }

    #[test]
    fn test_missing_sales_sheet_is_fatal() {
        let mut workbook = MemoryWorkbook::new().with_sheet("Outra", &["A"], vec![]);
        match loader().load_from(&mut workbook) {
            Err(AnalyticsError::NoMatchingSheet { prefix, available }) => {
                assert_eq!(prefix, "VENDA");
                assert_eq!(available, names(&["Outra"]));
            }
            other => panic!("expected NoMatchingSheet, got {:?}", other.map(|d| d.sales.len())),
        }
    }

    #[test]
    fn test_missing_source_file_is_fatal() {
        let result = SalesDataLoader::new("/definitely/not/here.xlsx").load();
        assert!(matches!(result, Err(AnalyticsError::SourceNotFound(_))));
    }

    #[test]
    fn test_return_sheets_are_read_and_normalized() {
        let mut workbook = sales_workbook().with_sheet(
            "DEVOLUCAO",
            &["DATA_VENDA", "DATA_DEVOLUCAO", "NR_NOTA_FISCAL", "NR_NOTA_DEVOLUCAO", "CD_PRODUTO", "QTD_SKU", "ROB"],
            vec![vec![
                "10/01/2024".into(),
                "05/02/2024".into(),
                "NF1".into(),
                CellValue::Empty,
                CellValue::Int(123),
                "1".into(),
                "10,5".into(),
            ]],
        );
        let dataset = loader().load_from(&mut workbook).unwrap();
        assert_eq!(dataset.returns_source, ReturnsSource::ReturnSheets);
        let ret = &dataset.returns[0];
        assert_eq!(ret.product_code, "123");
        assert_eq!(ret.sale_period, YearMonth::new(2024, 1));
        assert_eq!(ret.return_period, YearMonth::new(2024, 2));
        assert_eq!(ret.returned_order_id(), "NF1");
        assert_eq!(ret.category, UNCATEGORIZED);
        assert_eq!(ret.returned_revenue, Some(10.5));
    }

    #[test]
    fn test_panicking_progress_callback_does_not_abort_loading() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let loader = loader().with_progress(move |processed, _total| {
            seen.fetch_add(1, Ordering::SeqCst);
            if processed == 1 {
                panic!("progress bar went away");
            }
        });

        let dataset = loader.load_from(&mut sales_workbook()).unwrap();
        assert_eq!(dataset.sales.len(), 2);
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }
}
