//! URL → site identifier → strategy chain

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::strategy::{Strategy, StrategyRegistry};

/// Canonical retailer key derived from a URL host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SiteIdentifier {
    Known(String),
    Generic,
}

impl SiteIdentifier {
    pub fn as_str(&self) -> &str {
        match self {
            SiteIdentifier::Known(domain) => domain,
            SiteIdentifier::Generic => "generic",
        }
    }
}

impl fmt::Display for SiteIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SiteIdentifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One entry of a resolved chain.
#[derive(Debug, Clone)]
pub enum ChainStep {
    Strategy(Arc<Strategy>),
    /// Terminal LLM-assisted guess.
    Guess,
}

impl ChainStep {
    pub fn name(&self) -> &str {
        match self {
            ChainStep::Strategy(s) => &s.name,
            ChainStep::Guess => GUESS_STEP_NAME,
        }
    }
}

pub const GUESS_STEP_NAME: &str = "llm-guess";

#[derive(Debug, Clone)]
pub struct Resolution {
    pub site: SiteIdentifier,
    pub chain: Vec<ChainStep>,
}

/// Maps URLs to retailer keys by longest label-aligned host suffix, and
/// builds the ordered chain for them. Resolution never fails.
#[derive(Debug, Clone)]
pub struct SiteResolver {
    registry: Arc<StrategyRegistry>,
    /// Known retailer domains, longest first.
    domains: Vec<String>,
    guess_enabled: bool,
}

impl SiteResolver {
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        let mut domains = registry.known_domains();
        domains.sort_by(|a, b| b.len().cmp(&a.len()));
        Self {
            registry,
            domains,
            guess_enabled: false,
        }
    }

    /// Append the LLM guess step to every chain.
    pub fn with_guess(mut self, enabled: bool) -> Self {
        self.guess_enabled = enabled;
        self
    }

    pub fn site_for(&self, url: &str) -> SiteIdentifier {
        let Some(host) = host_of(url) else {
            return SiteIdentifier::Generic;
        };
        self.domains
            .iter()
            .find(|domain| host_matches(&host, domain))
            .map(|domain| SiteIdentifier::Known(domain.clone()))
            .unwrap_or(SiteIdentifier::Generic)
    }

    pub fn resolve(&self, url: &str) -> Resolution {
        let site = self.site_for(url);
        let mut chain = Vec::new();

        if let SiteIdentifier::Known(domain) = &site {
            chain.extend(
                self.registry
                    .iter()
                    .filter(|s| s.applies_to(domain))
                    .cloned()
                    .map(ChainStep::Strategy),
            );
        }
        chain.extend(
            self.registry
                .iter()
                .filter(|s| s.is_generic())
                .cloned()
                .map(ChainStep::Strategy),
        );
        if self.guess_enabled {
            chain.push(ChainStep::Guess);
        }

        Resolution { site, chain }
    }
}

/// Parse a page address. Scheme-less input such as `www.shop.com/p/1` is
/// read as https; a bare path (`/p/1`) stays an error.
pub fn page_url(raw: &str) -> Result<Url, url::ParseError> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) if url.has_host() => Ok(url),
        Ok(_) | Err(url::ParseError::RelativeUrlWithoutBase)
            if raw.split('/').next().is_some_and(|head| !head.is_empty()) =>
        {
            Url::parse(&format!("https://{raw}"))
        }
        Ok(_) => Err(url::ParseError::EmptyHost),
        Err(e) => Err(e),
    }
}

/// Lowercased host without a trailing dot.
fn host_of(url: &str) -> Option<String> {
    let parsed = page_url(url).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();
    (!host.is_empty()).then_some(host)
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
