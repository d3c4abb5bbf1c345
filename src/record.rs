//! The normalized product record and its price type
//!
//! Every value enters the record through [`normalize`], so a present field is
//! always trimmed, non-empty, and (for URL fields) absolute.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;

/// One slot of a [`ProductRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Price,
    Image,
    Description,
    CanonicalUrl,
}

impl Field {
    /// Fill order used by the engine.
    pub const ALL: [Field; 5] = [
        Field::Name,
        Field::Price,
        Field::Image,
        Field::Description,
        Field::CanonicalUrl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Price => "price",
            Field::Image => "image",
            Field::Description => "description",
            Field::CanonicalUrl => "canonical_url",
        }
    }

    fn is_url(self) -> bool {
        matches!(self, Field::Image | Field::CanonicalUrl)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A price as the site printed it, plus whatever could be parsed out of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Money {
    pub formatted: String,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
}

const CURRENCY_SYMBOLS: &[&str] = &["US$", "C$", "A$", "$", "€", "£", "¥", "₹", "₩", "₽", "kr", "zł"];
const CURRENCY_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "CAD", "AUD", "JPY", "INR", "CHF", "SEK", "NOK", "DKK", "PLN", "MXN", "KWD",
    "BHD", "OMR", "JOD", "TND",
];
/// ISO codes whose minor unit has three digits: `12.500` is twelve and a half.
const THREE_DECIMAL_CODES: &[&str] = &["KWD", "BHD", "OMR", "JOD", "TND"];

impl Money {
    /// Parse a price string. Returns `None` when the string has no digit at
    /// all ("See price in cart").
    pub fn parse(raw: &str) -> Option<Self> {
        let formatted = clean_text(raw)?;
        if !formatted.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }

        let currency = detect_currency(&formatted);
        Some(Self {
            amount: parse_amount(&formatted, currency.as_deref()),
            currency,
            formatted,
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted)
    }
}

fn detect_currency(s: &str) -> Option<String> {
    let upper = s.to_uppercase();
    if let Some(code) = CURRENCY_CODES.iter().find(|code| upper.contains(*code)) {
        return Some((*code).to_string());
    }
    CURRENCY_SYMBOLS
        .iter()
        .find(|sym| s.contains(*sym))
        .map(|sym| (*sym).to_string())
}

/// The first number in `s`, separators included. A space continues the
/// number only as a thousands group (`1 299,00`), so `19.99 24.99` stops
/// after `19.99`.
fn leading_number(s: &str) -> Option<String> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let chars: Vec<char> = s[start..].chars().collect();
    let mut number = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(c);
        } else if c.is_whitespace()
            && number.chars().all(|d| d.is_ascii_digit())
            && is_three_digit_group(&chars[i + 1..])
        {
            continue;
        } else {
            break;
        }
    }
    Some(number)
}

fn is_three_digit_group(rest: &[char]) -> bool {
    rest.len() >= 3
        && rest[..3].iter().all(char::is_ascii_digit)
        && rest.get(3).map_or(true, |c| !c.is_ascii_digit())
}

/// Pull the first number out of a price string and decide which separator is
/// the decimal point.
fn parse_amount(s: &str, currency: Option<&str>) -> Option<Decimal> {
    let number = leading_number(s)?;
    let number = number.trim_end_matches(['.', ',']);
    let three_decimals = currency.is_some_and(|c| THREE_DECIMAL_CODES.contains(&c));

    // A lone separator with three digits after it is a thousands group,
    // unless the whole part is zero or the currency has three decimals.
    let is_decimal = |sep: char, max_plain_digits: usize| {
        let Some(pos) = number.rfind(sep) else {
            return false;
        };
        if number.matches(sep).count() != 1 {
            return false;
        }
        let digits_after = number.len() - pos - 1;
        let zero_whole = number[..pos].chars().all(|c| c == '0');
        digits_after <= max_plain_digits || (digits_after == 3 && (zero_whole || three_decimals))
    };

    let decimal_sep = match (number.rfind('.'), number.rfind(',')) {
        (Some(d), Some(c)) => Some(if d > c { '.' } else { ',' }),
        (Some(_), None) => is_decimal('.', usize::MAX).then_some('.'),
        (None, Some(_)) => is_decimal(',', 2).then_some(','),
        (None, None) => None,
    };

    let normalized: String = match decimal_sep {
        Some(sep) => {
            let pos = number.rfind(sep)?;
            let whole: String = number[..pos].chars().filter(char::is_ascii_digit).collect();
            let frac: String = number[pos + 1..].chars().filter(char::is_ascii_digit).collect();
            let whole = if whole.is_empty() { "0".to_string() } else { whole };
            if frac.is_empty() {
                whole
            } else {
                format!("{whole}.{frac}")
            }
        }
        None => number.chars().filter(char::is_ascii_digit).collect(),
    };

    Decimal::from_str(&normalized).ok()
}

/// A normalized value ready to be written into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Price(Money),
    Url(Url),
}

/// Why a raw value was refused by [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Blank,
    NotAPrice,
    NotAUrl,
}

/// Trim and collapse internal whitespace; all-whitespace is absent.
pub fn clean_text(raw: &str) -> Option<String> {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// Resolve `raw` against `base`, keeping only http(s) results.
pub fn resolve_url(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let resolved = base.join(raw).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

/// Turn a raw string into the value type `field` stores.
pub fn normalize(field: Field, raw: &str, base: &Url) -> Result<FieldValue, Rejection> {
    let text = clean_text(raw).ok_or(Rejection::Blank)?;
    match field {
        Field::Price => Money::parse(&text)
            .map(FieldValue::Price)
            .ok_or(Rejection::NotAPrice),
        f if f.is_url() => resolve_url(base, &text)
            .map(FieldValue::Url)
            .ok_or(Rejection::NotAUrl),
        _ => Ok(FieldValue::Text(text)),
    }
}

/// The canonical output of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    name: Option<String>,
    price: Option<Money>,
    image_url: Option<Url>,
    description: Option<String>,
    canonical_url: Option<Url>,
}

impl ProductRecord {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn price(&self) -> Option<&Money> {
        self.price.as_ref()
    }

    pub fn image_url(&self) -> Option<&Url> {
        self.image_url.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn canonical_url(&self) -> Option<&Url> {
        self.canonical_url.as_ref()
    }

    pub fn has(&self, field: Field) -> bool {
        match field {
            Field::Name => self.name.is_some(),
            Field::Price => self.price.is_some(),
            Field::Image => self.image_url.is_some(),
            Field::Description => self.description.is_some(),
            Field::CanonicalUrl => self.canonical_url.is_some(),
        }
    }

    /// Name, price and image present. Description and canonical URL are
    /// optional.
    pub fn is_complete(&self) -> bool {
        self.has(Field::Name) && self.has(Field::Price) && self.has(Field::Image)
    }

    pub fn is_empty(&self) -> bool {
        !Field::ALL.iter().any(|f| self.has(*f))
    }

    pub fn missing(&self) -> Vec<Field> {
        Field::ALL.into_iter().filter(|f| !self.has(*f)).collect()
    }

    /// First writer wins: returns `false` and leaves the record untouched if
    /// the field is already populated or the value does not fit the field.
    pub(crate) fn fill(&mut self, field: Field, value: FieldValue) -> bool {
        if self.has(field) {
            return false;
        }
        match (field, value) {
            (Field::Name, FieldValue::Text(v)) => self.name = Some(v),
            (Field::Description, FieldValue::Text(v)) => self.description = Some(v),
            (Field::Price, FieldValue::Price(v)) => self.price = Some(v),
            (Field::Image, FieldValue::Url(v)) => self.image_url = Some(v),
            (Field::CanonicalUrl, FieldValue::Url(v)) => self.canonical_url = Some(v),
            _ => return false,
        }
        true
    }
}
