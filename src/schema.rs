use crate::error::{AnalyticsError, Result};
use crate::utils::last_day_of_month;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Label given to sales or return rows whose category cell is blank.
pub const UNCATEGORIZED: &str = "Sem Categoria";

/// A calendar month. Displays and serializes as `YYYY-MM`.
///
/// Rows whose period cannot be resolved carry `Option::<YearMonth>::None`
/// instead of a placeholder month, so they can never fall inside a set of
/// allowed periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1..=9999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        last_day_of_month(self.year, self.month)
    }

    /// Parses `YYYY-MM`, `YYYY/MM` or the compact `YYYYMM` form. Whitespace is
    /// ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let invalid = || AnalyticsError::InvalidPeriod(text.to_string());

        let (year, month) = if let Some((y, m)) = cleaned.split_once(['-', '/']) {
            if y.len() != 4 || m.is_empty() || m.len() > 2 {
                return Err(invalid());
            }
            (y, m)
        } else if cleaned.len() == 6 && cleaned.chars().all(|c| c.is_ascii_digit()) {
            cleaned.split_at(4)
        } else {
            return Err(invalid());
        };

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for YearMonth {
    fn schema_name() -> String {
        "YearMonth".to_string()
    }

    fn json_schema(_gen: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            format: Some("YYYY-MM".to_string()),
            ..Default::default()
        }
        .into()
    }
}

/// One raw spreadsheet cell, before any column-specific coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Period(YearMonth),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    /// Float cells are only built from finite values.
    pub fn float(value: f64) -> Self {
        if value.is_finite() {
            CellValue::Float(value)
        } else {
            CellValue::Empty
        }
    }

    /// Renders the cell as trimmed text. Integral floats lose their `.0`.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(text) => text.trim().to_string(),
            CellValue::Int(value) => value.to_string(),
            CellValue::Float(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    format!("{}", *value as i64)
                } else {
                    value.to_string()
                }
            }
            CellValue::Bool(value) => value.to_string(),
            CellValue::Date(date) => date.format("%Y-%m-%d").to_string(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            CellValue::Period(period) => period.to_string(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::float(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::Date(value)
    }
}

/// Canonical column names produced by the loader.
pub mod columns {
    pub const DATE: &str = "date";
    pub const PERIOD: &str = "period";
    pub const INVOICE_NUMBER: &str = "invoice_number";
    pub const CATEGORY: &str = "category";
    pub const PRODUCT_CODE: &str = "product_code";
    pub const PRODUCT_DESCRIPTION: &str = "product_description";
    pub const MANUFACTURER_CODE: &str = "manufacturer_code";
    pub const LISTING_CODE: &str = "listing_code";
    pub const LISTING_TYPE: &str = "listing_type";
    pub const ORDER_COUNT: &str = "order_count";
    pub const UNITS_SOLD: &str = "units_sold";
    pub const GROSS_REVENUE: &str = "gross_revenue";
    pub const UNIT_PRICE: &str = "unit_price";
    pub const MARGIN_PERCENTAGE: &str = "gross_margin_percentage";
    pub const UNIT_COST: &str = "unit_cost";
    pub const UNITS_RETURNED: &str = "units_returned";
    pub const RETURNED_REVENUE: &str = "returned_gross_revenue";

    pub const SALE_DATE: &str = "sale_date";
    pub const RETURN_DATE: &str = "return_date";
    pub const SALE_PERIOD: &str = "sale_period";
    pub const RETURN_PERIOD: &str = "return_period";
    pub const SALE_INVOICE: &str = "sale_invoice_number";
    pub const RETURN_INVOICE: &str = "return_invoice_number";
}

/// Source header to canonical column, for the sales sheets. Headers are
/// matched exactly first, then case-insensitively after trimming.
pub const SALES_COLUMN_MAP: &[(&str, &str)] = &[
    ("DATA", columns::DATE),
    ("DT_VENDA", columns::DATE),
    ("DATA_VENDA", columns::DATE),
    ("ANO_MES", columns::PERIOD),
    ("NR_NOTA_FISCAL", columns::INVOICE_NUMBER),
    ("CATEGORIA", columns::CATEGORY),
    ("CD_PRODUTO", columns::PRODUCT_CODE),
    ("DS_PRODUTO", columns::PRODUCT_DESCRIPTION),
    ("CD_FABRICANTE", columns::MANUFACTURER_CODE),
    ("CD_ANUNCIO", columns::LISTING_CODE),
    ("TP_ANUNCIO", columns::LISTING_TYPE),
    ("Qtd de pedido", columns::ORDER_COUNT),
    ("Qtd de sku no pedido", columns::UNITS_SOLD),
    ("QTD_SKU", columns::UNITS_SOLD),
    ("ROB", columns::GROSS_REVENUE),
    ("Preco vendido", columns::UNIT_PRICE),
    ("Perc Margem Bruta% RBLD", columns::MARGIN_PERCENTAGE),
    ("Custo do produto", columns::UNIT_COST),
    ("Qtd Produto Devolvido", columns::UNITS_RETURNED),
    ("Devolução Receita Bruta Tot$", columns::RETURNED_REVENUE),
];

/// Source header to canonical column, for the return sheets.
pub const RETURNS_COLUMN_MAP: &[(&str, &str)] = &[
    ("DATA_VENDA", columns::SALE_DATE),
    ("DT_VENDA", columns::SALE_DATE),
    ("DATA_DEVOLUCAO", columns::RETURN_DATE),
    ("DT_DEVOLUCAO", columns::RETURN_DATE),
    ("ANO_MES_VENDA", columns::SALE_PERIOD),
    ("ANO_MES_DEVOLUCAO", columns::RETURN_PERIOD),
    ("NR_NOTA_FISCAL", columns::SALE_INVOICE),
    ("NR_NOTA_FISCAL_VENDA", columns::SALE_INVOICE),
    ("NR_NOTA_DEVOLUCAO", columns::RETURN_INVOICE),
    ("NR_NOTA_FISCAL_DEVOLUCAO", columns::RETURN_INVOICE),
    ("CATEGORIA", columns::CATEGORY),
    ("CD_PRODUTO", columns::PRODUCT_CODE),
    ("DS_PRODUTO", columns::PRODUCT_DESCRIPTION),
    ("CD_ANUNCIO", columns::LISTING_CODE),
    ("Qtd de sku no pedido", columns::UNITS_RETURNED),
    ("QTD_SKU", columns::UNITS_RETURNED),
    ("Qtd Produto Devolvido", columns::UNITS_RETURNED),
    ("ROB", columns::RETURNED_REVENUE),
    ("Devolução Receita Bruta Tot$", columns::RETURNED_REVENUE),
];

pub const SALES_NUMERIC_COLUMNS: &[&str] = &[
    columns::ORDER_COUNT,
    columns::UNITS_SOLD,
    columns::GROSS_REVENUE,
    columns::UNIT_PRICE,
    columns::MARGIN_PERCENTAGE,
    columns::UNIT_COST,
    columns::UNITS_RETURNED,
    columns::RETURNED_REVENUE,
];

pub const RETURNS_NUMERIC_COLUMNS: &[&str] = &[columns::UNITS_RETURNED, columns::RETURNED_REVENUE];

/// One normalized sales transaction line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SalesRecord {
    pub date: Option<NaiveDate>,
    pub period: Option<YearMonth>,
    pub invoice_number: String,
    pub category: String,
    pub product_code: String,
    pub product_description: String,
    pub manufacturer_code: String,
    pub listing_code: String,
    pub listing_type: String,
    pub unit_cost: Option<f64>,
    pub unit_price: Option<f64>,
    pub units_sold: Option<f64>,
    pub order_count: Option<f64>,
    /// Always a fraction (0.25 for 25%).
    pub margin_fraction: Option<f64>,
    /// Recorded gross revenue, replaced by `computed_revenue` when not positive.
    pub gross_revenue: f64,
    /// `unit_price * units_sold`.
    pub computed_revenue: f64,
    pub cost_total: f64,
    pub estimated_gross_profit: f64,
    /// Returned units recorded on the sales row itself (single-sheet exports).
    pub units_returned: Option<f64>,
    pub returned_revenue: Option<f64>,
    pub return_rate: f64,
    /// Columns without a canonical mapping, keyed by lower-cased header.
    #[serde(default)]
    pub extra: BTreeMap<String, CellValue>,
}

impl SalesRecord {
    pub fn units(&self) -> f64 {
        self.units_sold.unwrap_or(0.0)
    }

    /// The row's month: the resolved period column, else the sale date.
    pub fn period(&self) -> Option<YearMonth> {
        self.period.or_else(|| self.date.map(YearMonth::from_date))
    }
}

/// One normalized return event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReturnRecord {
    pub sale_date: Option<NaiveDate>,
    pub return_date: Option<NaiveDate>,
    pub sale_period: Option<YearMonth>,
    pub return_period: Option<YearMonth>,
    pub sale_invoice_number: String,
    pub return_invoice_number: String,
    pub category: String,
    pub product_code: String,
    pub product_description: String,
    pub listing_code: String,
    pub units_returned: Option<f64>,
    pub returned_revenue: Option<f64>,
    #[serde(default)]
    pub extra: BTreeMap<String, CellValue>,
}

impl ReturnRecord {
    /// The order a return counts against: the return's own invoice when
    /// present, else the invoice of the originating sale.
    pub fn returned_order_id(&self) -> &str {
        let own = self.return_invoice_number.trim();
        if own.is_empty() {
            self.sale_invoice_number.trim()
        } else {
            own
        }
    }

    pub fn sale_month(&self) -> Option<YearMonth> {
        self.sale_period
            .or_else(|| self.sale_date.map(YearMonth::from_date))
    }

    pub fn return_month(&self) -> Option<YearMonth> {
        self.return_period
            .or_else(|| self.return_date.map(YearMonth::from_date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_month_parse_forms() {
        let expected = YearMonth::new(2024, 3).unwrap();
        assert_eq!(YearMonth::parse("2024-03").unwrap(), expected);
        assert_eq!(YearMonth::parse("2024/3").unwrap(), expected);
        assert_eq!(YearMonth::parse("202403").unwrap(), expected);
        assert_eq!(YearMonth::parse(" 2024 03 ").unwrap(), expected);
        assert!(YearMonth::parse("2024-13").is_err());
        assert!(YearMonth::parse("24-03").is_err());
        assert!(YearMonth::parse("nan").is_err());
    }

    #[test]
    fn test_year_month_ordering_and_display() {
        let dec = YearMonth::new(2023, 12).unwrap();
        let jan = YearMonth::new(2024, 1).unwrap();
        assert!(dec < jan);
        assert_eq!(jan.to_string(), "2024-01");
        assert_eq!(jan.last_day(), NaiveDate::from_ymd_opt(2024, 1, 31));
    }

    #[test]
    fn test_year_month_serde() {
        let period = YearMonth::new(2024, 7).unwrap();
        let json = serde_json::to_string(&period).unwrap();
        assert_eq!(json, "\"2024-07\"");
        let back: YearMonth = serde_json::from_str(&json).unwrap();
        assert_eq!(back, period);
    }

    #[test]
    fn test_returned_order_id_falls_back_to_sale_invoice() {
        let mut record = ReturnRecord {
            sale_invoice_number: "NF-100".to_string(),
            return_invoice_number: "DV-7".to_string(),
            ..Default::default()
        };
        assert_eq!(record.returned_order_id(), "DV-7");

        record.return_invoice_number = "   ".to_string();
        assert_eq!(record.returned_order_id(), "NF-100");
    }

    #[test]
    fn test_cell_to_text() {
        assert_eq!(CellValue::Float(123.0).to_text(), "123");
        assert_eq!(CellValue::Float(12.5).to_text(), "12.5");
        assert_eq!(CellValue::Text("  abc ".into()).to_text(), "abc");
        assert_eq!(CellValue::float(f64::NAN), CellValue::Empty);
    }
}
