//! Parsing of the heterogeneous amount fields found in disclosure metadata.

use serde_json::Value;

const CURRENCY_PREFIXES: &[&str] = &["₩", "$"];
const CURRENCY_SUFFIXES: &[&str] = &["원", "krw", "won"];

/// Parse an amount such as `300000`, `300000.0`, `"300,000"` or `"300,000원"`.
///
/// Returns `None` for anything that does not reduce to a plain non-negative integer,
/// which callers treat as "no constraint".
pub fn parse_amount(value: &Value) -> Option<i64> {
    match value {
        // Fractional amounts round up so they never slip under an integer ceiling.
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.ceil() as i64)),
        Value::String(text) => parse_amount_str(text),
        _ => None,
    }
}

pub fn parse_amount_str(text: &str) -> Option<i64> {
    let mut cleaned = text.trim().to_lowercase();
    for prefix in CURRENCY_PREFIXES {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            cleaned = rest.trim_start().to_string();
        }
    }
    for suffix in CURRENCY_SUFFIXES {
        if let Some(rest) = cleaned.strip_suffix(suffix) {
            cleaned = rest.trim_end().to_string();
            break;
        }
    }
    let digits = cleaned.replace(',', "");
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
