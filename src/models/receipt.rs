use garde::Validate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::services::structuring::StructuringError;

/// Structured expense data extracted from a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ExpenseData {
    #[garde(skip)]
    pub merchant: String,

    #[garde(skip)]
    pub date: String,

    #[garde(skip)]
    #[serde(deserialize_with = "deserialize_amount")]
    pub total: f64,

    #[garde(dive)]
    #[serde(default)]
    pub items: Vec<LineItem>,
}

/// A single purchased line on a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LineItem {
    #[garde(skip)]
    pub item: String,

    /// Whole units. Carried as `f64` so `2` and `2.0` read the same.
    #[garde(range(min = 0.0), custom(whole_number))]
    #[serde(deserialize_with = "deserialize_amount")]
    pub quantity: f64,

    #[garde(range(min = 0.0))]
    #[serde(deserialize_with = "deserialize_amount")]
    pub price: f64,
}

/// Parse the raw text returned by a structuring model into validated expense data.
///
/// Models routinely wrap JSON in Markdown fences or prose, so everything outside the
/// outermost `{ ... }` pair is ignored before parsing.
pub fn parse_expense_data(raw: &str) -> Result<ExpenseData, StructuringError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StructuringError::EmptyResponse);
    }

    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(StructuringError::NoJsonObject),
    };

    let data: ExpenseData = serde_json::from_str(json).map_err(StructuringError::Malformed)?;
    data.validate().map_err(StructuringError::InvalidShape)?;
    Ok(data)
}

fn whole_number(value: &f64, _ctx: &()) -> garde::Result {
    if value.fract() == 0.0 {
        Ok(())
    } else {
        Err(garde::Error::new("must be a whole number"))
    }
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];

/// Accept amounts as JSON numbers or as strings such as `"$1,299.00"`.
fn deserialize_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(n) => Ok(n),
        Amount::Text(s) => parse_amount_text(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {s:?}"))),
    }
}

/// Read a printed amount such as `"$1,299.00"`, `"-€4.50"` or `"12.00 USD"`.
///
/// Commas are only taken as thousands separators ahead of the decimal point. Anything
/// else, including decimal-comma forms like `"1.299,00"`, is rejected instead of guessed.
fn parse_amount_text(raw: &str) -> Option<f64> {
    let text = strip_currency(raw);
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, strip_currency(rest)),
        None => (false, text),
    };

    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut groups = whole.split(',');
    let lead = groups.next().unwrap_or_default();
    let mut digits = lead.to_string();
    let mut grouped = false;
    for group in groups {
        if group.len() != 3 {
            return None;
        }
        digits.push_str(group);
        grouped = true;
    }
    if (grouped && !(1..=3).contains(&lead.len())) || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let amount: f64 = format!("{digits}.{fraction}").trim_end_matches('.').parse().ok()?;
    Some(if negative { -amount } else { amount })
}

/// Drop currency symbols and a three-letter uppercase code (`USD`) from either end.
fn strip_currency(text: &str) -> &str {
    let is_code = |code: &str| code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase());

    let mut text = text.trim().trim_matches(CURRENCY_SYMBOLS).trim();
    if let Some(code) = text.get(..3) {
        if is_code(code) {
            text = text[3..].trim_start();
        }
    }
    if let Some(at) = text.len().checked_sub(3) {
        if text.get(at..).is_some_and(is_code) {
            text = text[..at].trim_end();
        }
    }
    text
}
