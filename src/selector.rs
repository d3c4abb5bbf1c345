//! Declarative selector specs
//!
//! A [`SelectorSpec`] says where one field lives for one strategy: a CSS
//! pattern, what to read from the match, and an optional post-processing rule.

use serde::{Deserialize, Serialize};

/// What to read from the element(s) matched by a pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractMode {
    /// Visible text content of the first match
    #[default]
    Text,
    /// Attribute value of the first match carrying it
    Attribute { name: String },
    /// Path into the JSON-LD held by the matched `<script>` blocks.
    /// The first segment is the schema.org `@type`, e.g. `Product.offers.price`.
    StructuredData { path: String },
}

/// Secondary lookup used by [`PostProcess::JoinFraction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentSpec {
    pub pattern: String,
    #[serde(default)]
    pub mode: ExtractMode,
}

fn default_separator() -> String {
    ".".to_string()
}

/// Rule applied to a raw hit before it is normalized for its field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PostProcess {
    #[default]
    Trim,
    /// Price split over two elements (dollars + cents).
    JoinFraction {
        fraction: FragmentSpec,
        #[serde(default = "default_separator")]
        separator: String,
        #[serde(default)]
        prefix: Option<String>,
    },
    /// Resolve against the page URL. URL fields are always resolved; this
    /// is for specs that want it spelled out.
    ResolveUrl,
}

/// One way to locate a field's raw value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSpec {
    pub pattern: String,
    #[serde(default)]
    pub mode: ExtractMode,
    #[serde(default)]
    pub post: PostProcess,
}

impl SelectorSpec {
    pub fn text(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            mode: ExtractMode::Text,
            post: PostProcess::Trim,
        }
    }

    pub fn attr(pattern: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            mode: ExtractMode::Attribute { name: name.into() },
            post: PostProcess::Trim,
        }
    }

    /// JSON-LD lookup against the standard `application/ld+json` scripts.
    pub fn json_ld(path: impl Into<String>) -> Self {
        Self {
            pattern: JSON_LD_SCRIPTS.to_string(),
            mode: ExtractMode::StructuredData { path: path.into() },
            post: PostProcess::Trim,
        }
    }

    pub fn with_post(mut self, post: PostProcess) -> Self {
        self.post = post;
        self
    }
}

pub const JSON_LD_SCRIPTS: &str = r#"script[type="application/ld+json"]"#;

/// Rebuild a price split over two elements.
///
/// Trailing separators and other non-digits are stripped from `whole`
/// (Amazon renders `19.` in the whole-part element), the fraction keeps its
/// digits only, and a missing or empty fraction becomes `00`.
pub fn join_fraction(
    whole: &str,
    fraction: Option<&str>,
    separator: &str,
    prefix: Option<&str>,
) -> String {
    let whole = whole
        .trim()
        .trim_end_matches(|c: char| !c.is_ascii_digit());
    let fraction: String = fraction
        .map(|f| f.chars().filter(char::is_ascii_digit).collect())
        .unwrap_or_default();
    let fraction = if fraction.is_empty() {
        "00".to_string()
    } else {
        fraction
    };

    format!("{}{whole}{separator}{fraction}", prefix.unwrap_or(""))
}
