//! Canonical product keys and margin normalization.
//!
//! Sales and return sheets disagree on how product codes are typed: the same
//! product shows up as `123`, `123.0` or `"123 "`. Every join in the crate
//! runs both sides through [`normalize_product_code`] first.

use crate::schema::CellValue;

const NULL_TOKENS: [&str; 4] = ["", "nan", "none", "null"];

/// Canonicalizes a product identifier cell into its string key.
pub fn normalize_product_code(value: &CellValue) -> String {
    match value {
        CellValue::Empty => String::new(),
        CellValue::Int(code) => code.to_string(),
        CellValue::Float(code) => normalize_float_code(*code),
        CellValue::Text(text) => normalize_product_text(text),
        other => normalize_product_text(&other.to_text()),
    }
}

/// Canonicalizes an already-textual product identifier.
pub fn normalize_product_text(text: &str) -> String {
    let trimmed = text.trim();
    if NULL_TOKENS.contains(&trimmed.to_lowercase().as_str()) {
        return String::new();
    }
    if let Some((integer, fractional)) = trimmed.split_once('.') {
        if fractional.trim_end().chars().all(|c| c == '0') {
            return integer.to_string();
        }
    }
    trimmed.to_string()
}

fn normalize_float_code(code: f64) -> String {
    if !code.is_finite() {
        return String::new();
    }
    if code.fract() == 0.0 {
        if code.abs() < 9.0e15 {
            return format!("{}", code as i64);
        }
        return format!("{:.0}", code);
    }
    normalize_product_text(&format!("{:.6}", code))
}

/// Converts a gross-margin percentage to a fraction. Values whose magnitude
/// exceeds 1 follow the whole-percent convention and are divided by 100;
/// values already in `[-1, 1]` are left alone, so re-applying the rule to a
/// normalized margin is a no-op.
pub fn normalize_margin(value: f64) -> f64 {
    if value.abs() > 1.0 {
        value / 100.0
    } else {
        value
    }
}
