//! Extraction engine
//!
//! Drives the resolved chain against one document session:
//!
//! 1. every step fills only the fields still missing, trying each field's
//!    selectors in order under one deadline shared by the whole step;
//! 2. misses (absent, blank, timed out, malformed, rejected) are logged in
//!    the step's outcome and never abort the run;
//! 3. the chain stops as soon as name, price and image are present, when the
//!    run deadline passes, or (under [`FailurePolicy::AbortRun`]) at the first
//!    accessor error.
//!
//! A run with at least one field is an [`Extraction`]; a run with none is
//! [`ExtractionError::TotalMiss`].

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::Instrument;
use url::Url;

use crate::accessor::{DocumentAccessor, DocumentSource, Lookup};
use crate::config::{EngineConfig, FailurePolicy, DEFAULT_GUESS_TIMEOUT};
use crate::error::{AccessError, ExtractionError};
use crate::guess::ProductGuesser;
use crate::record::{normalize, resolve_url, Field, ProductRecord};
use crate::resolver::{page_url, ChainStep, Resolution, SiteIdentifier, SiteResolver, GUESS_STEP_NAME};
use crate::selector::{join_fraction, ExtractMode, PostProcess, SelectorSpec};
use crate::strategy::{Strategy, StrategyRegistry};

/// Why one selector attempt produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissKind {
    Absent,
    Empty,
    TimedOut,
    /// The raw value did not survive normalization (no digits in a price,
    /// non-http URL).
    Rejected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Miss {
    pub field: Field,
    pub pattern: String,
    pub kind: MissKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every selector for every missing field was tried.
    Completed,
    /// The step's own budget ran out.
    BudgetExhausted,
    /// The accessor (or guesser) failed hard; the rest of the step was skipped.
    Aborted { reason: String },
    /// The whole-run deadline passed during this step.
    RunTimedOut,
}

/// Diagnostic record of one chain step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyOutcome {
    pub strategy: String,
    pub filled: Vec<Field>,
    pub misses: Vec<Miss>,
    pub status: OutcomeStatus,
}

impl StrategyOutcome {
    fn new(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            filled: Vec::new(),
            misses: Vec::new(),
            status: OutcomeStatus::Completed,
        }
    }

    fn miss(&mut self, field: Field, pattern: &str, kind: MissKind, detail: Option<String>) {
        tracing::debug!(
            strategy = %self.strategy,
            %field,
            pattern,
            ?kind,
            detail = detail.as_deref().unwrap_or(""),
            "soft miss"
        );
        self.misses.push(Miss {
            field,
            pattern: pattern.to_string(),
            kind,
            detail,
        });
    }
}

/// Result of a run that found at least one field.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub url: String,
    pub site: SiteIdentifier,
    pub record: ProductRecord,
    pub outcomes: Vec<StrategyOutcome>,
    /// The run deadline passed before the chain was exhausted.
    pub timed_out: bool,
}

impl Extraction {
    pub fn is_complete(&self) -> bool {
        self.record.is_complete()
    }
}

/// Per-request state. Owned by one call to [`Extractor::extract`].
struct ExtractionRun {
    url: String,
    site: SiteIdentifier,
    record: ProductRecord,
    outcomes: Vec<StrategyOutcome>,
    deadline: Instant,
    timed_out: bool,
}

impl ExtractionRun {
    fn finish(self) -> Result<Extraction, ExtractionError> {
        if self.record.is_empty() {
            tracing::info!(steps = self.outcomes.len(), timed_out = self.timed_out, "no product data found");
            return Err(ExtractionError::TotalMiss {
                url: self.url,
                timed_out: self.timed_out,
                outcomes: self.outcomes,
            });
        }

        tracing::info!(
            complete = self.record.is_complete(),
            missing = ?self.record.missing(),
            steps = self.outcomes.len(),
            timed_out = self.timed_out,
            "extraction finished"
        );
        Ok(Extraction {
            url: self.url,
            site: self.site,
            record: self.record,
            outcomes: self.outcomes,
            timed_out: self.timed_out,
        })
    }
}

/// Result of one selector attempt.
enum Attempt {
    Hit(String),
    Miss(MissKind, Option<String>),
    Unavailable(String),
}

/// The multi-strategy extraction engine. Holds only immutable configuration,
/// so one instance serves any number of concurrent runs.
pub struct Extractor {
    resolver: SiteResolver,
    failure_policy: FailurePolicy,
    run_timeout: std::time::Duration,
    guess_budget: std::time::Duration,
    guesser: Option<Arc<dyn ProductGuesser>>,
}

impl Extractor {
    pub fn new(registry: StrategyRegistry, config: &EngineConfig) -> Self {
        Self {
            resolver: SiteResolver::new(Arc::new(registry)),
            failure_policy: config.failure_policy,
            run_timeout: config.run_timeout,
            guess_budget: config
                .guess
                .as_ref()
                .map_or(DEFAULT_GUESS_TIMEOUT, |g| g.timeout),
            guesser: None,
        }
    }

    /// Append the LLM guess step to every chain.
    pub fn with_guesser(mut self, guesser: Arc<dyn ProductGuesser>) -> Self {
        self.resolver = self.resolver.with_guess(true);
        self.guesser = Some(guesser);
        self
    }

    pub fn resolve(&self, url: &str) -> Resolution {
        self.resolver.resolve(url)
    }

    /// Open a document through `source`, then [`extract`](Self::extract).
    ///
    /// # Errors
    ///
    /// [`ExtractionError::AccessorUnavailable`] if no document could be
    /// opened; otherwise as for `extract`.
    pub async fn extract_from<S: DocumentSource>(
        &self,
        url: &str,
        source: &S,
    ) -> Result<Extraction, ExtractionError> {
        let target = page_url(url).map_or_else(|_| url.to_string(), String::from);
        match source.open(&target).await {
            Ok(accessor) => self.extract(url, accessor).await,
            Err(source) => {
                tracing::warn!(url, error = %source, "document unavailable; no strategy run");
                Err(ExtractionError::AccessorUnavailable {
                    url: url.to_string(),
                    source,
                })
            }
        }
    }

    /// Run the chain for `url` against `accessor`.
    ///
    /// The accessor is consumed and dropped before this returns (or when the
    /// future is dropped), releasing its session on every exit path.
    ///
    /// # Errors
    ///
    /// [`ExtractionError::TotalMiss`] when no field could be populated.
    pub async fn extract<A: DocumentAccessor>(
        &self,
        url: &str,
        accessor: A,
    ) -> Result<Extraction, ExtractionError> {
        let Resolution { site, chain } = self.resolver.resolve(url);
        let span = tracing::info_span!("extract", url, site = %site);

        async move {
            let mut run = ExtractionRun {
                url: url.to_string(),
                site,
                record: ProductRecord::default(),
                outcomes: Vec::with_capacity(chain.len()),
                deadline: Instant::now() + self.run_timeout,
                timed_out: false,
            };

            self.drive(&mut run, &chain, &accessor).await;
            drop(accessor);
            run.finish()
        }
        .instrument(span)
        .await
    }

    async fn drive<A: DocumentAccessor>(&self, run: &mut ExtractionRun, chain: &[ChainStep], accessor: &A) {
        for step in chain {
            if Instant::now() >= run.deadline {
                run.timed_out = true;
                tracing::warn!(next = step.name(), "run deadline passed; returning what was found");
                break;
            }

            let outcome = match step {
                ChainStep::Strategy(strategy) => {
                    self.run_strategy(strategy, accessor, &mut run.record, run.deadline)
                        .await
                }
                ChainStep::Guess => match &self.guesser {
                    Some(guesser) => {
                        self.run_guess(guesser.as_ref(), &run.url, accessor.current_url(), &mut run.record, run.deadline)
                            .await
                    }
                    None => continue,
                },
            };

            let status = outcome.status.clone();
            run.outcomes.push(outcome);

            if run.record.is_complete() {
                tracing::debug!(after = step.name(), "record complete; skipping remaining steps");
                break;
            }
            match status {
                OutcomeStatus::RunTimedOut => {
                    run.timed_out = true;
                    tracing::warn!(during = step.name(), "run deadline passed; returning what was found");
                    break;
                }
                OutcomeStatus::Aborted { reason } if self.failure_policy == FailurePolicy::AbortRun => {
                    tracing::warn!(during = step.name(), %reason, "abort policy stops the run");
                    break;
                }
                _ => {}
            }
        }
    }

    async fn run_strategy<A: DocumentAccessor>(
        &self,
        strategy: &Strategy,
        accessor: &A,
        record: &mut ProductRecord,
        run_deadline: Instant,
    ) -> StrategyOutcome {
        let deadline = (Instant::now() + strategy.timeout_budget).min(run_deadline);
        let expired_status = || {
            if deadline >= run_deadline {
                OutcomeStatus::RunTimedOut
            } else {
                OutcomeStatus::BudgetExhausted
            }
        };
        let base = accessor.current_url().clone();
        let mut outcome = StrategyOutcome::new(&strategy.name);

        'fields: for field in Field::ALL {
            if record.has(field) {
                continue;
            }
            for spec in strategy.selectors(field) {
                if Instant::now() >= deadline {
                    outcome.status = expired_status();
                    break 'fields;
                }

                match attempt(accessor, spec, &base, deadline).await {
                    Attempt::Hit(raw) => match normalize(field, &raw, &base) {
                        Ok(value) => {
                            if record.fill(field, value) {
                                outcome.filled.push(field);
                            }
                            continue 'fields;
                        }
                        Err(rejection) => outcome.miss(
                            field,
                            &spec.pattern,
                            MissKind::Rejected,
                            Some(format!("{rejection:?}: {raw}")),
                        ),
                    },
                    Attempt::Miss(kind, detail) => {
                        let hard = matches!(kind, MissKind::TimedOut | MissKind::Error);
                        outcome.miss(field, &spec.pattern, kind, detail.clone());
                        if hard && self.failure_policy == FailurePolicy::AbortRun {
                            outcome.status = OutcomeStatus::Aborted {
                                reason: detail.unwrap_or_else(|| format!("{kind:?} on {}", spec.pattern)),
                            };
                            return outcome;
                        }
                    }
                    Attempt::Unavailable(reason) => {
                        tracing::warn!(strategy = %strategy.name, %reason, "document unavailable; abandoning strategy");
                        outcome.status = OutcomeStatus::Aborted { reason };
                        return outcome;
                    }
                }
            }
        }

        if outcome.status == OutcomeStatus::Completed && Instant::now() >= deadline {
            outcome.status = expired_status();
        }
        outcome
    }

    async fn run_guess(
        &self,
        guesser: &dyn ProductGuesser,
        url: &str,
        base: &Url,
        record: &mut ProductRecord,
        run_deadline: Instant,
    ) -> StrategyOutcome {
        let deadline = (Instant::now() + self.guess_budget).min(run_deadline);
        let mut outcome = StrategyOutcome::new(GUESS_STEP_NAME);

        let guessed = match tokio::time::timeout_at(deadline, guesser.guess(url)).await {
            Ok(Ok(guessed)) => guessed,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "guesser failed");
                outcome.status = OutcomeStatus::Aborted {
                    reason: e.to_string(),
                };
                return outcome;
            }
            Err(_) => {
                outcome.status = if deadline >= run_deadline {
                    OutcomeStatus::RunTimedOut
                } else {
                    OutcomeStatus::BudgetExhausted
                };
                return outcome;
            }
        };

        for field in record.missing() {
            let Some(raw) = guessed.get(field) else {
                outcome.miss(field, GUESS_STEP_NAME, MissKind::Absent, None);
                continue;
            };
            match normalize(field, raw, base) {
                Ok(value) => {
                    if record.fill(field, value) {
                        outcome.filled.push(field);
                    }
                }
                Err(rejection) => outcome.miss(
                    field,
                    GUESS_STEP_NAME,
                    MissKind::Rejected,
                    Some(format!("{rejection:?}: {raw}")),
                ),
            }
        }
        outcome
    }
}

/// Evaluate one selector spec, including its post-processing rule.
async fn attempt<A: DocumentAccessor>(accessor: &A, spec: &SelectorSpec, base: &Url, deadline: Instant) -> Attempt {
    let whole = match lookup(accessor, &spec.pattern, &spec.mode, deadline).await {
        Ok(raw) => raw,
        Err(miss) => return miss,
    };

    match &spec.post {
        PostProcess::Trim => Attempt::Hit(whole),
        PostProcess::JoinFraction {
            fraction,
            separator,
            prefix,
        } => {
            // Only a missing fragment means "no cents"; a fraction that timed
            // out or failed fails the whole selector.
            let cents = match lookup(accessor, &fraction.pattern, &fraction.mode, deadline).await {
                Ok(raw) => Some(raw),
                Err(Attempt::Miss(MissKind::Absent | MissKind::Empty, _)) => None,
                Err(Attempt::Miss(kind, detail)) => {
                    let detail = match detail {
                        Some(d) => format!("fraction `{}`: {d}", fraction.pattern),
                        None => format!("fraction `{}` {kind:?}", fraction.pattern),
                    };
                    return Attempt::Miss(kind, Some(detail));
                }
                Err(other) => return other,
            };
            Attempt::Hit(join_fraction(&whole, cents.as_deref(), separator, prefix.as_deref()))
        }
        PostProcess::ResolveUrl => match resolve_url(base, &whole) {
            Some(url) => Attempt::Hit(url.to_string()),
            None => Attempt::Miss(MissKind::Rejected, Some(format!("not a URL: {whole}"))),
        },
    }
}

/// One bounded accessor call. `Ok` only for a non-blank raw value.
async fn lookup<A: DocumentAccessor>(
    accessor: &A,
    pattern: &str,
    mode: &ExtractMode,
    deadline: Instant,
) -> Result<String, Attempt> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(Attempt::Miss(MissKind::TimedOut, None));
    }

    match tokio::time::timeout_at(deadline, accessor.await_element(pattern, mode, remaining)).await {
        Err(_) | Ok(Ok(Lookup::TimedOut)) => Err(Attempt::Miss(MissKind::TimedOut, None)),
        Ok(Ok(Lookup::Absent)) => Err(Attempt::Miss(MissKind::Absent, None)),
        Ok(Ok(Lookup::Found(raw))) if raw.trim().is_empty() => Err(Attempt::Miss(MissKind::Empty, None)),
        Ok(Ok(Lookup::Found(raw))) => Ok(raw),
        Ok(Err(AccessError::Unavailable(reason))) => Err(Attempt::Unavailable(reason)),
        Ok(Err(e @ AccessError::Malformed { .. })) => Err(Attempt::Miss(MissKind::Error, Some(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::{FetchError, GuessError};
    use crate::guess::GuessedProduct;
    use crate::selector::FragmentSpec;

    const BUDGET: Duration = Duration::from_secs(15);

    #[derive(Clone, Copy)]
    enum Behavior {
        Value(&'static str),
        Hang,
        Unavailable,
        Malformed,
    }

    /// Accessor answering from a pattern → behavior table; anything else is
    /// absent. Records every pattern asked for and flags its own release.
    struct MockDocument {
        url: Url,
        table: HashMap<&'static str, Behavior>,
        asked: Arc<Mutex<Vec<String>>>,
        released: Arc<AtomicBool>,
    }

    impl MockDocument {
        fn new(url: &str, table: &[(&'static str, Behavior)]) -> Self {
            Self {
                url: Url::parse(url).unwrap(),
                table: table.iter().copied().collect(),
                asked: Arc::default(),
                released: Arc::default(),
            }
        }
    }

    impl Drop for MockDocument {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DocumentAccessor for MockDocument {
        async fn await_element(
            &self,
            pattern: &str,
            _mode: &ExtractMode,
            _timeout: Duration,
        ) -> Result<Lookup, AccessError> {
            self.asked.lock().unwrap().push(pattern.to_string());
            match self.table.get(pattern) {
                Some(Behavior::Value(v)) => Ok(Lookup::Found((*v).to_string())),
                Some(Behavior::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Lookup::Absent)
                }
                Some(Behavior::Unavailable) => Err(AccessError::Unavailable("page closed".into())),
                Some(Behavior::Malformed) => Err(AccessError::Malformed {
                    pattern: pattern.to_string(),
                    reason: "unexpected token".into(),
                }),
                None => Ok(Lookup::Absent),
            }
        }

        fn current_url(&self) -> &Url {
            &self.url
        }
    }

    fn site(name: &str) -> Strategy {
        Strategy::site(name, &["shop.com"], BUDGET)
    }

    fn generic(name: &str) -> Strategy {
        Strategy::generic(name, BUDGET)
    }

    fn extractor(strategies: Vec<Strategy>, config: EngineConfig) -> Extractor {
        let mut registry = StrategyRegistry::new();
        for s in strategies {
            registry.register(s).unwrap();
        }
        Extractor::new(registry, &config)
    }

    fn default_extractor(strategies: Vec<Strategy>) -> Extractor {
        extractor(strategies, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_site_price_beats_generic_price() {
        let engine = default_extractor(vec![
            generic("og")
                .field(Field::Price, [SelectorSpec::text(".generic-price")])
                .field(Field::Image, [SelectorSpec::text(".generic-image")]),
            site("shop").field(Field::Price, [SelectorSpec::text(".site-price")]),
        ]);
        let doc = MockDocument::new(
            "https://shop.com/p/1",
            &[
                (".site-price", Behavior::Value("$10.00")),
                (".generic-price", Behavior::Value("$12.00")),
                (".generic-image", Behavior::Value("/w.jpg")),
            ],
        );

        let extraction = engine.extract("https://shop.com/p/1", doc).await.unwrap();
        assert_eq!(extraction.site, SiteIdentifier::Known("shop.com".into()));
        assert_eq!(extraction.record.price().unwrap().formatted, "$10.00");
        assert_eq!(
            extraction.record.image_url().unwrap().as_str(),
            "https://shop.com/w.jpg"
        );
        assert_eq!(extraction.outcomes[0].strategy, "shop");
        assert_eq!(extraction.outcomes[1].filled, vec![Field::Image]);
        assert!(!extraction.is_complete());
    }

    #[tokio::test]
    async fn test_later_strategies_never_overwrite() {
        let engine = default_extractor(vec![
            generic("first").field(Field::Name, [SelectorSpec::text(".a")]),
            generic("second")
                .field(Field::Name, [SelectorSpec::text(".b")])
                .field(Field::Description, [SelectorSpec::text(".desc")]),
        ]);
        let doc = MockDocument::new(
            "https://elsewhere.com/",
            &[
                (".a", Behavior::Value("Alpha")),
                (".b", Behavior::Value("Beta")),
                (".desc", Behavior::Value("  Sturdy   and small ")),
            ],
        );
        let asked = doc.asked.clone();

        let extraction = engine.extract("https://elsewhere.com/", doc).await.unwrap();
        assert_eq!(extraction.record.name(), Some("Alpha"));
        assert_eq!(extraction.record.description(), Some("Sturdy and small"));
        assert!(!asked.lock().unwrap().contains(&".b".to_string()), "filled fields are not queried again");
    }

    #[tokio::test]
    async fn test_complete_record_stops_the_chain() {
        let engine = default_extractor(vec![
            site("shop")
                .field(Field::Name, [SelectorSpec::text("h1")])
                .field(Field::Price, [SelectorSpec::text(".price")])
                .field(Field::Image, [SelectorSpec::attr("img", "src")]),
            generic("og").field(Field::Description, [SelectorSpec::text(".og-desc")]),
        ]);
        let doc = MockDocument::new(
            "https://www.shop.com/p/1",
            &[
                ("h1", Behavior::Value("Drill")),
                (".price", Behavior::Value("$99")),
                ("img", Behavior::Value("https://cdn.shop.com/d.jpg")),
                (".og-desc", Behavior::Value("never read")),
            ],
        );
        let asked = doc.asked.clone();
        let released = doc.released.clone();

        let extraction = engine.extract("https://www.shop.com/p/1", doc).await.unwrap();
        assert!(extraction.is_complete());
        assert_eq!(extraction.outcomes.len(), 1);
        assert!(!asked.lock().unwrap().contains(&".og-desc".to_string()));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_total_miss_logs_every_attempted_strategy() {
        let engine = default_extractor(vec![
            site("shop").field(Field::Price, [SelectorSpec::text(".price"), SelectorSpec::text(".alt")]),
            generic("og").field(Field::Name, [SelectorSpec::attr("meta", "content")]),
            generic("jsonld").field(Field::Name, [SelectorSpec::json_ld("Product.name")]),
        ]);
        let doc = MockDocument::new("https://shop.com/p/1", &[(".alt", Behavior::Value("   "))]);

        let err = engine.extract("https://shop.com/p/1", doc).await.unwrap_err();
        match &err {
            ExtractionError::TotalMiss { outcomes, timed_out, .. } => {
                assert_eq!(outcomes.len(), 3);
                assert!(!timed_out);
                assert_eq!(outcomes[0].misses[0].kind, MissKind::Absent);
                assert_eq!(outcomes[0].misses[1].kind, MissKind::Empty);
            }
            other => panic!("expected TotalMiss, got {other:?}"),
        }
        assert_eq!(err.strategies_tried(), vec!["shop", "og", "jsonld"]);
        assert!(err.to_string().contains("shop, og, jsonld"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_shared_across_selectors() {
        let engine = default_extractor(vec![generic("slow")
            .field(Field::Name, [SelectorSpec::text(".n1"), SelectorSpec::text(".n2")])
            .field(Field::Price, [SelectorSpec::text(".p1"), SelectorSpec::text(".p2")])
            .field(Field::Image, [SelectorSpec::text(".i1"), SelectorSpec::text(".i2")])]);
        let table: Vec<(&'static str, Behavior)> = [".n1", ".n2", ".p1", ".p2", ".i1", ".i2"]
            .into_iter()
            .map(|p| (p, Behavior::Hang))
            .collect();
        let doc = MockDocument::new("https://elsewhere.com/", &table);

        let started = Instant::now();
        let err = engine.extract("https://elsewhere.com/", doc).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(elapsed >= BUDGET, "stopped early: {elapsed:?}");
        assert!(elapsed < BUDGET + Duration::from_secs(1), "took {elapsed:?}");
        match err {
            ExtractionError::TotalMiss { outcomes, .. } => {
                assert_eq!(outcomes[0].status, OutcomeStatus::BudgetExhausted);
                assert_eq!(outcomes[0].misses.len(), 1);
                assert_eq!(outcomes[0].misses[0].kind, MissKind::TimedOut);
            }
            other => panic!("expected TotalMiss, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_returns_partial_record() {
        let config = EngineConfig {
            run_timeout: Duration::from_secs(20),
            ..EngineConfig::default()
        };
        let engine = extractor(
            vec![
                generic("a")
                    .field(Field::Name, [SelectorSpec::text("h1")])
                    .field(Field::Price, [SelectorSpec::text(".price")]),
                generic("b").field(Field::Image, [SelectorSpec::text(".img")]),
                generic("c").field(Field::Image, [SelectorSpec::text(".img2")]),
            ],
            config,
        );
        let doc = MockDocument::new(
            "https://elsewhere.com/",
            &[
                ("h1", Behavior::Value("Lamp")),
                (".price", Behavior::Hang),
                (".img", Behavior::Hang),
                (".img2", Behavior::Value("https://cdn.example.com/l.jpg")),
            ],
        );

        let extraction = engine.extract("https://elsewhere.com/", doc).await.unwrap();
        assert!(extraction.timed_out);
        assert_eq!(extraction.record.name(), Some("Lamp"));
        assert!(extraction.record.image_url().is_none());
        assert_eq!(extraction.outcomes.len(), 2);
        assert_eq!(extraction.outcomes[0].status, OutcomeStatus::BudgetExhausted);
        assert_eq!(extraction.outcomes[1].status, OutcomeStatus::RunTimedOut);
    }

    #[tokio::test]
    async fn test_unavailable_document_aborts_only_the_strategy() {
        let engine = default_extractor(vec![
            generic("broken")
                .field(Field::Name, [SelectorSpec::text("h1")])
                .field(Field::Price, [SelectorSpec::text(".never")]),
            generic("fallback").field(Field::Price, [SelectorSpec::text(".price")]),
        ]);
        let doc = MockDocument::new(
            "https://elsewhere.com/",
            &[("h1", Behavior::Unavailable), (".price", Behavior::Value("€5,00"))],
        );
        let asked = doc.asked.clone();

        let extraction = engine.extract("https://elsewhere.com/", doc).await.unwrap();
        assert!(matches!(extraction.outcomes[0].status, OutcomeStatus::Aborted { .. }));
        assert_eq!(extraction.record.price().unwrap().formatted, "€5,00");
        assert!(!asked.lock().unwrap().contains(&".never".to_string()));
    }

    #[tokio::test]
    async fn test_abort_policy_stops_the_run() {
        let config = EngineConfig {
            failure_policy: FailurePolicy::AbortRun,
            ..EngineConfig::default()
        };
        let engine = extractor(
            vec![
                generic("broken").field(Field::Name, [SelectorSpec::text("h1")]),
                generic("fallback").field(Field::Price, [SelectorSpec::text(".price")]),
            ],
            config,
        );
        let doc = MockDocument::new(
            "https://elsewhere.com/",
            &[("h1", Behavior::Unavailable), (".price", Behavior::Value("$5"))],
        );

        let err = engine.extract("https://elsewhere.com/", doc).await.unwrap_err();
        assert_eq!(err.strategies_tried(), vec!["broken"]);
    }

    /// `.whole` joined with the given cents pattern, `$` prefixed.
    fn split(fraction: &str) -> SelectorSpec {
        SelectorSpec::text(".whole").with_post(PostProcess::JoinFraction {
            fraction: FragmentSpec {
                pattern: fraction.to_string(),
                mode: ExtractMode::Text,
            },
            separator: ".".to_string(),
            prefix: Some("$".to_string()),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_policy_stops_on_timeout() {
        let config = EngineConfig {
            failure_policy: FailurePolicy::AbortRun,
            ..EngineConfig::default()
        };
        let engine = extractor(
            vec![
                generic("slow").field(Field::Name, [SelectorSpec::text("h1"), SelectorSpec::text(".title")]),
                generic("fallback").field(Field::Price, [SelectorSpec::text(".price")]),
            ],
            config,
        );
        let doc = MockDocument::new(
            "https://elsewhere.com/",
            &[
                ("h1", Behavior::Hang),
                (".title", Behavior::Value("never asked")),
                (".price", Behavior::Value("$5")),
            ],
        );
        let asked = doc.asked.clone();

        let err = engine.extract("https://elsewhere.com/", doc).await.unwrap_err();
        assert_eq!(err.strategies_tried(), vec!["slow"]);
        match &err {
            ExtractionError::TotalMiss { outcomes, .. } => {
                assert!(matches!(outcomes[0].status, OutcomeStatus::Aborted { .. }));
            }
            other => panic!("expected TotalMiss, got {other:?}"),
        }
        assert_eq!(*asked.lock().unwrap(), vec!["h1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_with_nothing_found_is_a_timed_out_miss() {
        let config = EngineConfig {
            run_timeout: Duration::from_secs(10),
            ..EngineConfig::default()
        };
        let engine = extractor(
            vec![
                generic("slow").field(Field::Name, [SelectorSpec::text("h1")]),
                generic("never").field(Field::Name, [SelectorSpec::text(".title")]),
            ],
            config,
        );
        let doc = MockDocument::new("https://elsewhere.com/", &[("h1", Behavior::Hang)]);

        let started = Instant::now();
        let err = engine.extract("https://elsewhere.com/", doc).await.unwrap_err();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11), "took {elapsed:?}");

        assert!(err.timed_out());
        assert_eq!(err.strategies_tried(), vec!["slow"]);
        match &err {
            ExtractionError::TotalMiss { outcomes, timed_out, .. } => {
                assert!(timed_out);
                assert_eq!(outcomes[0].status, OutcomeStatus::RunTimedOut);
            }
            other => panic!("expected TotalMiss, got {other:?}"),
        }
        assert!(crate::response::FailureResponse::from(&err).timed_out);
    }

    #[tokio::test]
    async fn test_split_price_is_joined() {
        let engine = default_extractor(vec![generic("split").field(Field::Price, [split(".cents")])]);
        let doc = MockDocument::new(
            "https://elsewhere.com/",
            &[(".whole", Behavior::Value("19.")), (".cents", Behavior::Value("99"))],
        );
        let extraction = engine.extract("https://elsewhere.com/", doc).await.unwrap();
        let price = extraction.record.price().unwrap();
        assert_eq!(price.formatted, "$19.99");
        assert_eq!(price.amount.unwrap().to_string(), "19.99");

        let engine = default_extractor(vec![generic("split").field(Field::Price, [split(".missing")])]);
        let doc = MockDocument::new("https://elsewhere.com/", &[(".whole", Behavior::Value("19"))]);
        let extraction = engine.extract("https://elsewhere.com/", doc).await.unwrap();
        assert_eq!(extraction.record.price().unwrap().formatted, "$19.00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fraction_does_not_invent_cents() {
        let engine = default_extractor(vec![
            generic("split").field(Field::Price, [split(".cents")]),
            generic("fallback").field(Field::Price, [SelectorSpec::text(".price")]),
        ]);
        let doc = MockDocument::new(
            "https://elsewhere.com/",
            &[
                (".whole", Behavior::Value("19")),
                (".cents", Behavior::Hang),
                (".price", Behavior::Value("$19.49")),
            ],
        );

        let extraction = engine.extract("https://elsewhere.com/", doc).await.unwrap();
        assert_eq!(extraction.record.price().unwrap().formatted, "$19.49");

        let split_outcome = &extraction.outcomes[0];
        assert!(split_outcome.filled.is_empty());
        assert_eq!(split_outcome.status, OutcomeStatus::BudgetExhausted);
        assert_eq!(split_outcome.misses.len(), 1);
        assert_eq!(split_outcome.misses[0].kind, MissKind::TimedOut);
        assert_eq!(split_outcome.misses[0].pattern, ".whole");
    }

    #[tokio::test]
    async fn test_failed_fraction_falls_through_to_next_selector() {
        let engine = default_extractor(vec![generic("amazonish").field(
            Field::Price,
            [split(".bad-cents"), SelectorSpec::text(".offscreen")],
        )]);
        let doc = MockDocument::new(
            "https://elsewhere.com/",
            &[
                (".whole", Behavior::Value("19")),
                (".bad-cents", Behavior::Malformed),
                (".offscreen", Behavior::Value("$19.99")),
            ],
        );

        let extraction = engine.extract("https://elsewhere.com/", doc).await.unwrap();
        assert_eq!(extraction.record.price().unwrap().formatted, "$19.99");
        let miss = &extraction.outcomes[0].misses[0];
        assert_eq!(miss.kind, MissKind::Error);
        assert!(miss.detail.as_deref().unwrap().contains(".bad-cents"));
    }

    #[tokio::test]
    async fn test_rejected_values_fall_through_to_next_selector() {
        let engine = default_extractor(vec![generic("g")
            .field(Field::Price, [SelectorSpec::text(".cta"), SelectorSpec::text(".price")])
            .field(Field::Image, [SelectorSpec::text(".js"), SelectorSpec::text(".img")])]);
        let doc = MockDocument::new(
            "https://elsewhere.com/shop/item",
            &[
                (".cta", Behavior::Value("See price in cart")),
                (".price", Behavior::Value("$7.25")),
                (".js", Behavior::Value("javascript:void(0)")),
                (".img", Behavior::Value("../img/a.png")),
            ],
        );

        let extraction = engine.extract("https://elsewhere.com/shop/item", doc).await.unwrap();
        assert_eq!(extraction.record.price().unwrap().formatted, "$7.25");
        assert_eq!(
            extraction.record.image_url().unwrap().as_str(),
            "https://elsewhere.com/img/a.png"
        );
        let kinds: Vec<MissKind> = extraction.outcomes[0].misses.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MissKind::Rejected, MissKind::Rejected]);
    }

    #[tokio::test]
    async fn test_malformed_selector_is_a_soft_miss() {
        struct Malformed(Url);

        #[async_trait]
        impl DocumentAccessor for Malformed {
            async fn await_element(&self, pattern: &str, _: &ExtractMode, _: Duration) -> Result<Lookup, AccessError> {
                if pattern == "div[" {
                    Err(AccessError::Malformed {
                        pattern: pattern.into(),
                        reason: "unexpected end".into(),
                    })
                } else {
                    Ok(Lookup::Found("Kettle".into()))
                }
            }

            fn current_url(&self) -> &Url {
                &self.0
            }
        }

        let engine = default_extractor(vec![generic("g").field(
            Field::Name,
            [SelectorSpec::text("div["), SelectorSpec::text("h1")],
        )]);
        let doc = Malformed(Url::parse("https://elsewhere.com/").unwrap());
        let extraction = engine.extract("https://elsewhere.com/", doc).await.unwrap();
        assert_eq!(extraction.record.name(), Some("Kettle"));
        assert_eq!(extraction.outcomes[0].misses[0].kind, MissKind::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_releases_the_document() {
        let engine = default_extractor(vec![generic("slow").field(Field::Name, [SelectorSpec::text("h1")])]);
        let doc = MockDocument::new("https://elsewhere.com/", &[("h1", Behavior::Hang)]);
        let released = doc.released.clone();

        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            engine.extract("https://elsewhere.com/", doc),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(released.load(Ordering::SeqCst));
    }

    struct FixedGuesser(GuessedProduct);

    #[async_trait]
    impl ProductGuesser for FixedGuesser {
        async fn guess(&self, _url: &str) -> Result<GuessedProduct, GuessError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_guess_only_fills_gaps() {
        let guesser = FixedGuesser(GuessedProduct {
            product_name: Some("Guessed name".into()),
            product_price: Some("$3.50".into()),
            product_image_url: Some("data:image/png;base64,AAAA".into()),
            ..GuessedProduct::default()
        });
        let engine = default_extractor(vec![generic("og").field(Field::Name, [SelectorSpec::text("h1")])])
            .with_guesser(Arc::new(guesser));
        let doc = MockDocument::new("https://elsewhere.com/", &[("h1", Behavior::Value("Real name"))]);

        let extraction = engine.extract("https://elsewhere.com/", doc).await.unwrap();
        assert_eq!(extraction.record.name(), Some("Real name"));
        assert_eq!(extraction.record.price().unwrap().formatted, "$3.50");

        let guess = extraction.outcomes.last().unwrap();
        assert_eq!(guess.strategy, GUESS_STEP_NAME);
        assert_eq!(guess.filled, vec![Field::Price]);
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let engine = default_extractor(vec![generic("g").field(Field::Name, [SelectorSpec::text("h1")])]);
        let a = MockDocument::new("https://a.com/", &[("h1", Behavior::Value("A"))]);
        let b = MockDocument::new("https://b.com/", &[("h1", Behavior::Value("B"))]);

        let (ra, rb) = tokio::join!(engine.extract("https://a.com/", a), engine.extract("https://b.com/", b));
        assert_eq!(ra.unwrap().record.name(), Some("A"));
        assert_eq!(rb.unwrap().record.name(), Some("B"));
    }

    struct DownSource;

    #[async_trait]
    impl DocumentSource for DownSource {
        type Accessor = MockDocument;

        async fn open(&self, url: &str) -> Result<MockDocument, FetchError> {
            Err(FetchError::Status {
                status: 503,
                url: url.to_string(),
            })
        }
    }

    /// Serves every URL from one page, remembering what it was asked to open.
    #[derive(Default)]
    struct RecordingSource {
        opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentSource for RecordingSource {
        type Accessor = MockDocument;

        async fn open(&self, url: &str) -> Result<MockDocument, FetchError> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(MockDocument::new(url, &[("h1", Behavior::Value("Garden Hose"))]))
        }
    }

    #[tokio::test]
    async fn test_scheme_less_url_is_opened_as_https() {
        let engine = default_extractor(vec![generic("g").field(Field::Name, [SelectorSpec::text("h1")])]);
        let source = RecordingSource::default();

        let extraction = engine
            .extract_from("www.example-retailer.com/product/123", &source)
            .await
            .unwrap();

        assert_eq!(extraction.record.name(), Some("Garden Hose"));
        assert_eq!(extraction.url, "www.example-retailer.com/product/123");
        assert_eq!(
            *source.opened.lock().unwrap(),
            vec!["https://www.example-retailer.com/product/123".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unavailable_source_short_circuits() {
        let engine = default_extractor(vec![generic("g").field(Field::Name, [SelectorSpec::text("h1")])]);
        let err = engine.extract_from("https://elsewhere.com/", &DownSource).await.unwrap_err();
        assert!(matches!(err, ExtractionError::AccessorUnavailable { .. }));
        assert!(err.strategies_tried().is_empty());
    }
}
