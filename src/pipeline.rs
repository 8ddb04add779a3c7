use crate::config::AnalyzerConfig;
use crate::http::{HttpSettings, build_client};
use crate::merge::{ProviderSignals, merge};
use crate::metrics;
use crate::models::{StageReport, StageStatus};
use crate::product::AnalyzedProduct;
use crate::providers::ner::HfNer;
use crate::providers::rewrite::ChatRewriter;
use crate::providers::zero_shot::HfZeroShot;
use crate::providers::{
    EntityRecognizer, Provider, ProductRewriter, ProviderOutcome, RewriteOutput, RewriteRequest,
    SentenceClassifier,
};
use crate::text::{extract_baseline, normalize};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::Instant as Deadline;
use tracing::{debug, info, warn};

pub const STAGE_NORMALIZE: &str = "normalize";
pub const STAGE_RULES: &str = "rules";
pub const STAGE_NER: &str = "ner";
pub const STAGE_ZERO_SHOT: &str = "zero_shot";
pub const STAGE_REWRITE: &str = "rewrite";
pub const STAGE_MERGE: &str = "merge";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzeOptions {
    /// Rewrite variant to attempt regardless of weak fields, empty text or primary selection.
    pub force_provider: Option<Provider>,
    pub strict: bool,
    pub rules_only: bool,
}

impl AnalyzeOptions {
    pub fn rules_only() -> Self {
        Self {
            rules_only: true,
            ..Self::default()
        }
    }

    fn disabled_reason(&self) -> Option<&'static str> {
        if self.rules_only {
            Some("rules_only")
        } else if self.strict {
            Some("strict")
        } else {
            None
        }
    }

    fn forced_rewriter(&self) -> Option<Provider> {
        self.force_provider
            .filter(|p| matches!(p, Provider::Deepseek | Provider::Openai))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisMeta {
    pub attempted: Vec<Provider>,
    pub succeeded: Vec<Provider>,
    /// Milliseconds per stage plus `total`.
    pub timings: BTreeMap<String, u64>,
    pub stages: Vec<StageReport>,
}

impl AnalysisMeta {
    fn record(&mut self, report: StageReport) {
        metrics::stage_elapsed(stage_label(&report.name), report.elapsed_ms);
        self.timings
            .insert(report.name.clone(), report.elapsed_ms as u64);
        self.stages.push(report);
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }
}

fn stage_label(name: &str) -> &'static str {
    match name {
        STAGE_NORMALIZE => STAGE_NORMALIZE,
        STAGE_RULES => STAGE_RULES,
        STAGE_NER => STAGE_NER,
        STAGE_ZERO_SHOT => STAGE_ZERO_SHOT,
        STAGE_REWRITE => STAGE_REWRITE,
        _ => STAGE_MERGE,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub product: AnalyzedProduct,
    pub meta: AnalysisMeta,
}

/// Text to product orchestration. Cheap to clone; every handle inside is shared.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<AnalyzerConfig>,
    ner: Arc<dyn EntityRecognizer>,
    zero_shot: Arc<dyn SentenceClassifier>,
    rewriters: Vec<Arc<dyn ProductRewriter>>,
}

impl Pipeline {
    pub fn new(config: AnalyzerConfig) -> Self {
        let http = build_client(&HttpSettings::from_env());
        let ner = Arc::new(HfNer::new(&config.hf, http.clone()));
        let zero_shot = Arc::new(HfZeroShot::new(&config.hf, http.clone()));
        let rewriters: Vec<Arc<dyn ProductRewriter>> = config
            .rewrite_order()
            .into_iter()
            .map(|rewrite| {
                Arc::new(ChatRewriter::new(
                    rewrite.clone(),
                    http.clone(),
                    config.max_images,
                )) as Arc<dyn ProductRewriter>
            })
            .collect();
        Self::with_providers(config, ner, zero_shot, rewriters)
    }

    pub fn from_env() -> Self {
        Self::new(AnalyzerConfig::from_env())
    }

    /// `rewriters` are in attempt order: primary first.
    pub fn with_providers(
        config: AnalyzerConfig,
        ner: Arc<dyn EntityRecognizer>,
        zero_shot: Arc<dyn SentenceClassifier>,
        rewriters: Vec<Arc<dyn ProductRewriter>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            ner,
            zero_shot,
            rewriters,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn rewrite_plan(&self, options: &AnalyzeOptions) -> Vec<Arc<dyn ProductRewriter>> {
        if let Some(forced) = options.forced_rewriter() {
            return self
                .rewriters
                .iter()
                .filter(|r| r.provider() == forced)
                .take(1)
                .cloned()
                .collect();
        }
        let attempts = if self.config.alternate_enabled { 2 } else { 1 };
        self.rewriters
            .iter()
            .filter(|r| r.is_configured())
            .take(attempts)
            .cloned()
            .collect()
    }

    /// Never fails: whatever the providers do, a complete product comes back.
    pub async fn analyze(
        &self,
        text: &str,
        images: &[String],
        options: &AnalyzeOptions,
    ) -> AnalysisReport {
        let started = Instant::now();
        let deadline = Deadline::now() + self.config.budget;
        let mut meta = AnalysisMeta::default();

        let mut report = StageReport::new(STAGE_NORMALIZE);
        report.begin();
        let stage_start = Instant::now();
        let normalized = normalize(text);
        report.output = json!({
            "lines": normalized.lines.len(),
            "sentences": normalized.sentences.len(),
        });
        report.finish(StageStatus::Succeeded, stage_start.elapsed().as_millis());
        meta.record(report);

        let mut report = StageReport::new(STAGE_RULES);
        report.begin();
        let stage_start = Instant::now();
        let baseline = extract_baseline(&normalized);
        let weak_fields = baseline.weak_fields();
        report.output = json!({ "weak_fields": weak_fields });
        report.finish(StageStatus::Succeeded, stage_start.elapsed().as_millis());
        meta.record(report);

        let disabled = options.disabled_reason();
        let empty = normalized.is_empty();
        let forced = options.forced_rewriter().is_some();

        let ner = match (disabled, empty, self.ner.is_configured()) {
            (Some(reason), _, _) => Planned::Skipped(reason),
            (None, true, _) => Planned::Skipped("empty_text"),
            (None, false, false) => Planned::Skipped("missing_credentials"),
            (None, false, true) => {
                let ner = self.ner.clone();
                let text = normalized.text.clone();
                Planned::Spawned(
                    Instant::now(),
                    spawn_stage(async move { ner.recognize(&text, remaining(deadline)).await }),
                )
            }
        };

        let zero_shot = match (disabled, empty, self.zero_shot.is_configured()) {
            (Some(reason), _, _) => Planned::Skipped(reason),
            (None, true, _) => Planned::Skipped("empty_text"),
            (None, false, false) => Planned::Skipped("missing_credentials"),
            (None, false, true) => {
                let classifier = self.zero_shot.clone();
                let sentences = normalized.sentences.clone();
                Planned::Spawned(
                    Instant::now(),
                    spawn_stage(async move {
                        classifier.classify(&sentences, remaining(deadline)).await
                    }),
                )
            }
        };

        let plan = self.rewrite_plan(options);
        let planned_rewriters: Vec<Provider> = plan.iter().map(|r| r.provider()).collect();
        let rewrite = if let Some(reason) = disabled {
            Planned::Skipped(reason)
        } else if empty && !forced {
            Planned::Skipped("empty_text")
        } else if plan.is_empty() {
            Planned::Skipped("missing_credentials")
        } else if weak_fields.is_empty() && !forced {
            Planned::Skipped("no_weak_fields")
        } else {
            let request = RewriteRequest {
                text: normalized.text.clone(),
                baseline: baseline.clone(),
                weak_fields: weak_fields.clone(),
                images: images.to_vec(),
            };
            Planned::Spawned(
                Instant::now(),
                spawn_stage(run_rewrites(plan, request, deadline)),
            )
        };

        let (ner, zero_shot, rewrite) = tokio::join!(
            ner.join(deadline),
            zero_shot.join(deadline),
            rewrite.join(deadline)
        );

        let entities = settle_provider(STAGE_NER, Provider::Ner, ner, &mut meta);
        let labels = settle_provider(STAGE_ZERO_SHOT, Provider::ZeroShot, zero_shot, &mut meta);
        let rewritten = settle_rewrite(rewrite, &planned_rewriters, &mut meta);

        let mut report = StageReport::new(STAGE_MERGE);
        report.begin();
        let stage_start = Instant::now();
        let merged = merge(
            &baseline,
            ProviderSignals {
                entities: entities.as_deref(),
                labels: labels.as_ref(),
                rewrite: rewritten.as_ref(),
            },
        );
        let product = if merged.satisfies_schema() {
            report.finish(StageStatus::Succeeded, stage_start.elapsed().as_millis());
            merged
        } else {
            warn!(target: "analyzer.pipeline", "merged product broke the schema, using baseline");
            report.detail = Some("schema_violation".into());
            report.finish(StageStatus::Failed, stage_start.elapsed().as_millis());
            baseline
        };
        meta.record(report);

        let total = started.elapsed().as_millis() as u64;
        meta.timings.insert("total".into(), total);
        info!(
            target: "analyzer.pipeline",
            attempted = meta.attempted.len(),
            succeeded = meta.succeeded.len(),
            elapsed_ms = total,
            "analysis finished"
        );

        AnalysisReport { product, meta }
    }
}

fn remaining(deadline: Deadline) -> Duration {
    deadline.saturating_duration_since(Deadline::now())
}

fn spawn_stage<T, F>(future: F) -> JoinHandle<(T, u128)>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(async move {
        let started = Instant::now();
        let value = future.await;
        (value, started.elapsed().as_millis())
    })
}

enum Planned<T> {
    Skipped(&'static str),
    Spawned(Instant, JoinHandle<(T, u128)>),
}

enum Joined<T> {
    Skipped(&'static str),
    Done(T, u128),
    Panicked(String, u128),
    TimedOut(u128),
}

impl<T> Planned<T> {
    async fn join(self, deadline: Deadline) -> Joined<T> {
        match self {
            Planned::Skipped(reason) => Joined::Skipped(reason),
            Planned::Spawned(started, mut handle) => {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok((value, elapsed))) => Joined::Done(value, elapsed),
                    Ok(Err(err)) => Joined::Panicked(err.to_string(), started.elapsed().as_millis()),
                    Err(_) => {
                        handle.abort();
                        Joined::TimedOut(started.elapsed().as_millis())
                    }
                }
            }
        }
    }
}

fn settle_provider<T>(
    name: &str,
    provider: Provider,
    joined: Joined<ProviderOutcome<T>>,
    meta: &mut AnalysisMeta,
) -> Option<T> {
    let mut report = StageReport::new(name);
    if let Joined::Skipped(reason) = joined {
        debug!(target: "analyzer.pipeline", stage = name, reason, "stage skipped");
        meta.record(StageReport::skipped(name, reason));
        return None;
    }
    report.begin();
    report.providers.push(provider);
    meta.attempted.push(provider);

    let (status, elapsed, value) = match joined {
        Joined::Done(outcome, elapsed) => {
            metrics::provider_outcome(provider.as_str(), outcome.label());
            report.detail = outcome.reason().map(str::to_string);
            let status = match &outcome {
                ProviderOutcome::Ok(_) => StageStatus::Succeeded,
                ProviderOutcome::TimedOut => StageStatus::TimedOut,
                _ => StageStatus::Failed,
            };
            (status, elapsed, outcome.into_option())
        }
        Joined::Panicked(err, elapsed) => {
            warn!(target: "analyzer.pipeline", %provider, error = %err, "provider task failed");
            report.detail = Some(err);
            (StageStatus::Failed, elapsed, None)
        }
        Joined::TimedOut(elapsed) => {
            warn!(target: "analyzer.pipeline", %provider, "provider cancelled at deadline");
            (StageStatus::TimedOut, elapsed, None)
        }
        Joined::Skipped(_) => (StageStatus::Skipped, 0, None),
    };
    if value.is_some() {
        meta.succeeded.push(provider);
    }
    report.finish(status, elapsed);
    meta.record(report);
    value
}

#[derive(Debug, Default)]
struct RewriteRun {
    attempts: Vec<(Provider, &'static str, Option<String>)>,
    output: Option<(Provider, RewriteOutput)>,
}

/// Primary first; the next variant is tried only while nothing usable came back.
async fn run_rewrites(
    plan: Vec<Arc<dyn ProductRewriter>>,
    request: RewriteRequest,
    deadline: Deadline,
) -> RewriteRun {
    let mut run = RewriteRun::default();
    for rewriter in plan {
        let budget = remaining(deadline);
        if budget.is_zero() {
            break;
        }
        let provider = rewriter.provider();
        let outcome = rewriter.rewrite(&request, budget).await;
        metrics::provider_outcome(provider.as_str(), outcome.label());
        run.attempts
            .push((provider, outcome.label(), outcome.reason().map(str::to_string)));
        if let ProviderOutcome::Ok(output) = outcome {
            run.output = Some((provider, output));
            break;
        }
    }
    run
}

fn settle_rewrite(
    joined: Joined<RewriteRun>,
    planned: &[Provider],
    meta: &mut AnalysisMeta,
) -> Option<RewriteOutput> {
    let mut report = StageReport::new(STAGE_REWRITE);
    report.begin();
    match joined {
        Joined::Skipped(reason) => {
            debug!(target: "analyzer.pipeline", stage = STAGE_REWRITE, reason, "stage skipped");
            meta.record(StageReport::skipped(STAGE_REWRITE, reason));
            None
        }
        Joined::Done(run, elapsed) => {
            report.providers = run.attempts.iter().map(|(p, _, _)| *p).collect();
            meta.attempted.extend(report.providers.iter().copied());
            report.output = json!(
                run.attempts
                    .iter()
                    .map(|(p, label, reason)| json!({ "provider": p, "outcome": label, "reason": reason }))
                    .collect::<Vec<_>>()
            );
            let status = match (&run.output, run.attempts.last()) {
                (Some(_), _) => StageStatus::Succeeded,
                (None, Some((_, "timed_out", _))) => StageStatus::TimedOut,
                (None, Some(_)) => StageStatus::Failed,
                (None, None) => StageStatus::TimedOut,
            };
            report.finish(status, elapsed);
            meta.record(report);
            run.output.map(|(provider, output)| {
                meta.succeeded.push(provider);
                output
            })
        }
        Joined::Panicked(err, elapsed) => {
            warn!(target: "analyzer.pipeline", error = %err, "rewrite task failed");
            report.providers = planned.iter().take(1).copied().collect();
            meta.attempted.extend(report.providers.iter().copied());
            report.detail = Some(err);
            report.finish(StageStatus::Failed, elapsed);
            meta.record(report);
            None
        }
        Joined::TimedOut(elapsed) => {
            warn!(target: "analyzer.pipeline", "rewrite cancelled at deadline");
            report.providers = planned.iter().take(1).copied().collect();
            meta.attempted.extend(report.providers.iter().copied());
            report.finish(StageStatus::TimedOut, elapsed);
            meta.record(report);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::FieldSource;
    use crate::providers::{Entity, LabelRanking};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FIXTURE: &str = "طقم نسائي 3 قطع حرير تركي مزين بكريستال\nمقاسات L و XL يلبس من وزن 40 الى 70\nالسعر للشمال 3500";

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        Hang,
        Panic,
    }

    async fn act<T>(behaviour: Behaviour, value: T) -> ProviderOutcome<T> {
        match behaviour {
            Behaviour::Succeed => ProviderOutcome::Ok(value),
            Behaviour::Fail => ProviderOutcome::Unavailable("HTTP 503".into()),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ProviderOutcome::TimedOut
            }
            Behaviour::Panic => panic!("provider exploded"),
        }
    }

    struct FakeNer {
        configured: bool,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntityRecognizer for FakeNer {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn recognize(&self, _text: &str, _budget: Duration) -> ProviderOutcome<Vec<Entity>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let entity = Entity {
                group: "ORG".into(),
                word: "زارا".into(),
                score: 0.9,
                start: 0,
                end: 4,
            };
            act(self.behaviour, vec![entity]).await
        }
    }

    struct FakeClassifier {
        configured: bool,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SentenceClassifier for FakeClassifier {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn classify(
            &self,
            _sentences: &[String],
            _budget: Duration,
        ) -> ProviderOutcome<LabelRanking> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            act(self.behaviour, LabelRanking::new()).await
        }
    }

    struct FakeRewriter {
        provider: Provider,
        configured: bool,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProductRewriter for FakeRewriter {
        fn provider(&self) -> Provider {
            self.provider
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn rewrite(
            &self,
            _request: &RewriteRequest,
            _budget: Duration,
        ) -> ProviderOutcome<RewriteOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let output = RewriteOutput {
                name: Some(format!("فستان سهرة من {}", self.provider)),
                confidence: Some(0.8),
                ..Default::default()
            };
            act(self.behaviour, output).await
        }
    }

    struct Fakes {
        ner: Arc<FakeNer>,
        zero_shot: Arc<FakeClassifier>,
        deepseek: Arc<FakeRewriter>,
        openai: Arc<FakeRewriter>,
    }

    impl Fakes {
        fn new(ner: Behaviour, zero_shot: Behaviour, deepseek: Behaviour, openai: Behaviour) -> Self {
            let rewriter = |provider, behaviour| {
                Arc::new(FakeRewriter {
                    provider,
                    configured: true,
                    behaviour,
                    calls: AtomicUsize::new(0),
                })
            };
            Self {
                ner: Arc::new(FakeNer {
                    configured: true,
                    behaviour: ner,
                    calls: AtomicUsize::new(0),
                }),
                zero_shot: Arc::new(FakeClassifier {
                    configured: true,
                    behaviour: zero_shot,
                    calls: AtomicUsize::new(0),
                }),
                deepseek: rewriter(Provider::Deepseek, deepseek),
                openai: rewriter(Provider::Openai, openai),
            }
        }

        fn pipeline(&self, config: AnalyzerConfig) -> Pipeline {
            Pipeline::with_providers(
                config,
                self.ner.clone(),
                self.zero_shot.clone(),
                vec![
                    self.deepseek.clone() as Arc<dyn ProductRewriter>,
                    self.openai.clone() as Arc<dyn ProductRewriter>,
                ],
            )
        }

        fn provider_calls(&self) -> usize {
            self.ner.calls.load(Ordering::SeqCst)
                + self.zero_shot.calls.load(Ordering::SeqCst)
                + self.deepseek.calls.load(Ordering::SeqCst)
                + self.openai.calls.load(Ordering::SeqCst)
        }
    }

    fn offline() -> Pipeline {
        Pipeline::new(AnalyzerConfig::default())
    }

    fn status(report: &AnalysisReport, stage: &str) -> StageStatus {
        report.meta.stage(stage).map(|s| s.status).unwrap()
    }

    #[tokio::test]
    async fn every_input_yields_a_complete_product() {
        let pipeline = offline();
        let long = "كلام ".repeat(5000);
        for text in ["", "   ", "🔥🔥", "123", "السعر", FIXTURE, long.as_str()] {
            let report = pipeline.analyze(text, &[], &AnalyzeOptions::default()).await;
            assert!(report.product.satisfies_schema(), "schema broken for {text:?}");
            assert_eq!(report.meta.stages.len(), 6);
            assert!(report.meta.stages.iter().all(|s| s.status.is_terminal()));
            assert!(report.meta.timings.contains_key("total"));
        }
    }

    #[tokio::test]
    async fn unconfigured_providers_are_skipped() {
        let report = offline()
            .analyze(FIXTURE, &[], &AnalyzeOptions::default())
            .await;
        for stage in [STAGE_NER, STAGE_ZERO_SHOT, STAGE_REWRITE] {
            assert_eq!(status(&report, stage), StageStatus::Skipped);
        }
        assert!(report.meta.attempted.is_empty());
        assert_eq!(report.product, extract_baseline(&normalize(FIXTURE)));
    }

    #[tokio::test]
    async fn failing_providers_leave_the_baseline_untouched() {
        let fakes = Fakes::new(Behaviour::Fail, Behaviour::Panic, Behaviour::Fail, Behaviour::Fail);
        let report = fakes
            .pipeline(AnalyzerConfig::default())
            .analyze(FIXTURE, &[], &AnalyzeOptions::default())
            .await;
        assert_eq!(report.product, extract_baseline(&normalize(FIXTURE)));
        assert_eq!(status(&report, STAGE_NER), StageStatus::Failed);
        assert_eq!(status(&report, STAGE_ZERO_SHOT), StageStatus::Failed);
        assert_eq!(status(&report, STAGE_REWRITE), StageStatus::Failed);
        assert_eq!(
            report.meta.attempted,
            vec![Provider::Ner, Provider::ZeroShot, Provider::Deepseek, Provider::Openai]
        );
        assert!(report.meta.succeeded.is_empty());
    }

    #[tokio::test]
    async fn hung_providers_time_out_within_budget() {
        let fakes = Fakes::new(Behaviour::Hang, Behaviour::Hang, Behaviour::Hang, Behaviour::Hang);
        let config = AnalyzerConfig {
            budget: Duration::from_millis(300),
            ..AnalyzerConfig::default()
        };
        let started = Instant::now();
        let report = fakes
            .pipeline(config)
            .analyze(FIXTURE, &[], &AnalyzeOptions::default())
            .await;
        assert!(started.elapsed() < Duration::from_secs(3));
        for stage in [STAGE_NER, STAGE_ZERO_SHOT, STAGE_REWRITE] {
            assert_eq!(status(&report, stage), StageStatus::TimedOut);
        }
        assert_eq!(report.product, extract_baseline(&normalize(FIXTURE)));
    }

    #[tokio::test]
    async fn digit_scripts_give_the_same_price() {
        let pipeline = offline();
        let options = AnalyzeOptions::default();
        let arabic = pipeline.analyze("السعر ٣٥٠٠", &[], &options).await;
        let ascii = pipeline.analyze("السعر 3500", &[], &options).await;
        assert_eq!(
            arabic.product.price_range.value.low,
            ascii.product.price_range.value.low
        );
        assert_eq!(ascii.product.price_range.value.low, 3500.0);

        let grouped = pipeline.analyze("السعر ٣٬٥٠٠ ريال", &[], &options).await;
        let plain = pipeline.analyze("السعر 3,500 ريال", &[], &options).await;
        assert_eq!(grouped.product.price_range, plain.product.price_range);
        assert_eq!(grouped.product.price_range.value.low, 3500.0);
    }

    #[tokio::test]
    async fn small_numbers_only_count_when_alone() {
        let pipeline = offline();
        let options = AnalyzeOptions::default();
        let alone = pipeline.analyze("السعر 40", &[], &options).await;
        assert_eq!(alone.product.price_range.value.low, 40.0);

        let sizes = pipeline.analyze("مقاس 40 و 42", &[], &options).await;
        assert_eq!(sizes.product.price_range.value.low, 0.0);
        assert_eq!(sizes.product.price_range.value.high, 0.0);
        assert_eq!(sizes.product.price_range.confidence, 0.0);
    }

    #[tokio::test]
    async fn fixture_scenario() {
        let report = offline()
            .analyze(FIXTURE, &[], &AnalyzeOptions::default())
            .await;
        let product = report.product;
        assert!(!product.name.value.is_empty());
        assert!(product.price_range.value.low >= 80.0);
        assert_eq!(product.price_range.value.low, 3500.0);
        assert!(product.sizes.value.contains(&"L".to_string()));
        assert!(product.sizes.value.contains(&"XL".to_string()));
    }

    #[tokio::test]
    async fn rules_only_beats_force_provider() {
        let fakes = Fakes::new(
            Behaviour::Succeed,
            Behaviour::Succeed,
            Behaviour::Succeed,
            Behaviour::Succeed,
        );
        let options = AnalyzeOptions {
            rules_only: true,
            force_provider: Some(Provider::Openai),
            ..AnalyzeOptions::default()
        };
        let report = fakes
            .pipeline(AnalyzerConfig::default())
            .analyze(FIXTURE, &[], &options)
            .await;
        assert_eq!(fakes.provider_calls(), 0);
        for stage in [STAGE_NER, STAGE_ZERO_SHOT, STAGE_REWRITE] {
            let report = report.meta.stage(stage).unwrap();
            assert_eq!(report.status, StageStatus::Skipped);
            assert_eq!(report.detail.as_deref(), Some("rules_only"));
        }
        assert!(report.meta.attempted.is_empty());

        let strict = AnalyzeOptions {
            strict: true,
            ..AnalyzeOptions::default()
        };
        let report = fakes
            .pipeline(AnalyzerConfig::default())
            .analyze(FIXTURE, &[], &strict)
            .await;
        assert_eq!(fakes.provider_calls(), 0);
        assert_eq!(
            report.meta.stage(STAGE_NER).unwrap().detail.as_deref(),
            Some("strict")
        );
    }

    #[tokio::test]
    async fn force_provider_attempts_the_named_variant() {
        let fakes = Fakes::new(Behaviour::Fail, Behaviour::Fail, Behaviour::Succeed, Behaviour::Succeed);
        let options = AnalyzeOptions {
            force_provider: Some(Provider::Openai),
            ..AnalyzeOptions::default()
        };
        let report = fakes
            .pipeline(AnalyzerConfig::default())
            .analyze("", &[], &options)
            .await;
        assert_eq!(fakes.openai.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fakes.deepseek.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.meta.attempted, vec![Provider::Openai]);
        assert_eq!(report.meta.succeeded, vec![Provider::Openai]);
        assert_eq!(status(&report, STAGE_NER), StageStatus::Skipped);
    }

    #[tokio::test]
    async fn alternate_runs_only_after_primary_yields_nothing() {
        let text = "شي جميل جدا";
        let fakes = Fakes::new(Behaviour::Fail, Behaviour::Fail, Behaviour::Fail, Behaviour::Succeed);
        let report = fakes
            .pipeline(AnalyzerConfig::default())
            .analyze(text, &[], &AnalyzeOptions::default())
            .await;
        assert_eq!(report.product.name.value, "فستان سهرة من openai");
        assert_eq!(report.product.name.source, FieldSource::Llm);
        assert!(report.meta.succeeded.contains(&Provider::Openai));
        assert_eq!(status(&report, STAGE_REWRITE), StageStatus::Succeeded);

        let fakes = Fakes::new(Behaviour::Fail, Behaviour::Fail, Behaviour::Fail, Behaviour::Succeed);
        let config = AnalyzerConfig {
            alternate_enabled: false,
            ..AnalyzerConfig::default()
        };
        let report = fakes
            .pipeline(config)
            .analyze(text, &[], &AnalyzeOptions::default())
            .await;
        assert_eq!(fakes.openai.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.product.name.source, FieldSource::Rule);
    }

    #[tokio::test]
    async fn successful_entities_supplement_tags() {
        let fakes = Fakes::new(Behaviour::Succeed, Behaviour::Succeed, Behaviour::Fail, Behaviour::Fail);
        let report = fakes
            .pipeline(AnalyzerConfig::default())
            .analyze(FIXTURE, &[], &AnalyzeOptions::default())
            .await;
        assert!(report.product.tags.value.contains(&"زارا".to_string()));
        assert_eq!(
            report.meta.succeeded,
            vec![Provider::Ner, Provider::ZeroShot]
        );
    }

    #[tokio::test]
    async fn elongated_words_do_not_break_analysis() {
        let pipeline = offline();
        let options = AnalyzeOptions::default();
        for text in ["عباية فخخخمه جدا\nالسعر 9000", "رووووعه", "فستااااان سهرة"] {
            let report = pipeline.analyze(text, &[], &options).await;
            assert!(report.product.satisfies_schema(), "schema broken for {text:?}");
            assert!(!report.product.name.value.contains("خخخ"));
        }
    }
}
