//! The five-stage prompt-to-plasmid pipeline.
//!
//! Each stage ends by handing one [`PipelineSnapshot`] to the caller before
//! the next stage starts. [`Pipeline::spawn`] runs the stages on a worker
//! thread and hands snapshots over a rendezvous channel, so a slow consumer
//! holds the pipeline back rather than letting snapshots pile up.

use crate::annotate::Annotator;
use crate::config::{DEFAULT_MAX_LENGTH, ModelCatalog, Settings};
use crate::error::{ConfigError, GenerationError, PipelineError};
use crate::extract::{Alphabet, extract};
use crate::generator::{ModelRegistry, SequenceGenerator};
use crate::llm_bridge::KeywordTokenProvider;
use crate::metrics::{compute_metrics, gc_windows};
use crate::provider_manager::{ProviderManager, panic_message};
use crate::vocabulary::TokenVocabulary;
use log::{error, info};
use plasmid_protocol::{
    FailureKind, Field, GeneratedSequence, PipelineFailure, PipelineSnapshot, PipelineStage, PipelineStep,
    STAGE_COUNT, TokenOutcome,
};
use plasmid_render::layout_circular_map;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const OFFLINE_PROVIDER_ID: &str = "keywords";
const OFFLINE_MODEL_KEY: &str = "builtin";
const MAP_TITLE_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub prompt: String,
    #[serde(default)]
    pub model_key: Option<String>,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default)]
    pub alphabet: Alphabet,
}

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

impl PipelineRequest {
    pub fn new(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            model_key: None,
            max_length: DEFAULT_MAX_LENGTH,
            alphabet: Alphabet::default(),
        }
    }

    pub fn with_model(mut self, model_key: &str) -> Self {
        self.model_key = Some(model_key.to_string());
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

/// Checked between stages; a running model call is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    Snapshot(PipelineSnapshot),
    Failed(PipelineFailure),
}

/// Per-request bookkeeping: where we are and what the caller has seen.
struct Progress<'a> {
    sink: &'a mut dyn FnMut(PipelineEvent) -> bool,
    cancel: &'a CancellationToken,
    step: PipelineStep,
    last_stage: Option<PipelineStage>,
}

impl Progress<'_> {
    fn enter(&mut self, step: PipelineStep) -> Result<(), PipelineError> {
        self.step = step;
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn deliver(&mut self, snapshot: &PipelineSnapshot) -> Result<(), PipelineError> {
        info!(
            "Stage {}/{STAGE_COUNT} {}: {}",
            snapshot.version,
            snapshot.stage.as_str(),
            snapshot.status
        );
        if !(self.sink)(PipelineEvent::Snapshot(snapshot.clone())) {
            self.cancel.cancel();
            return Err(PipelineError::Cancelled);
        }
        self.last_stage = Some(snapshot.stage);
        Ok(())
    }
}

/// Shared, read-only collaborators. Cloning is cheap and clones share the
/// model cache.
#[derive(Clone)]
pub struct Pipeline {
    vocabulary: Arc<TokenVocabulary>,
    providers: Arc<ProviderManager>,
    models: Arc<ModelCatalog>,
    registry: Arc<ModelRegistry>,
    annotator: Arc<Annotator>,
    default_model: String,
}

impl Pipeline {
    pub fn new(
        vocabulary: Arc<TokenVocabulary>,
        providers: Arc<ProviderManager>,
        models: Arc<ModelCatalog>,
        registry: Arc<ModelRegistry>,
        annotator: Arc<Annotator>,
    ) -> Self {
        let default_model = models.default_key().to_string();
        Self {
            vocabulary,
            providers,
            models,
            registry,
            annotator,
            default_model,
        }
    }

    /// Offline mode uses the keyword matcher and the builtin model only, so
    /// no network access happens.
    pub fn from_settings(settings: &Settings, offline: bool) -> Result<Self, ConfigError> {
        let vocabulary = settings.load_vocabulary()?;
        let models = settings.load_model_catalog()?;
        let providers = if offline {
            ProviderManager::new(vec![Box::new(KeywordTokenProvider::new(OFFLINE_PROVIDER_ID))])
        } else {
            ProviderManager::from_catalog(&settings.load_provider_catalog()?)
        };
        let default_model = if offline {
            OFFLINE_MODEL_KEY.to_string()
        } else {
            settings.model_key(None, &models).to_string()
        };
        let registry = ModelRegistry::from_catalog(models.clone());
        Ok(Self::new(
            Arc::new(vocabulary),
            Arc::new(providers),
            Arc::new(models),
            Arc::new(registry),
            Arc::new(Annotator::from_settings(settings)),
        )
        .with_default_model(&default_model))
    }

    pub fn with_default_model(mut self, model_key: &str) -> Self {
        self.default_model = model_key.to_string();
        self
    }

    pub fn vocabulary(&self) -> &TokenVocabulary {
        &self.vocabulary
    }

    pub fn providers(&self) -> &ProviderManager {
        &self.providers
    }

    pub fn models(&self) -> &ModelCatalog {
        &self.models
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Runs all stages on the calling thread. `sink` receives each snapshot
    /// and, on failure, one final `Failed` event; returning `false` from it
    /// cancels the run.
    pub fn run(
        &self,
        request: &PipelineRequest,
        cancel: &CancellationToken,
        mut sink: impl FnMut(PipelineEvent) -> bool,
    ) -> Result<PipelineSnapshot, PipelineFailure> {
        let mut progress = Progress {
            sink: &mut sink,
            cancel,
            step: PipelineStep::Startup,
            last_stage: None,
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_stages(request, &mut progress)))
            .unwrap_or_else(|payload| Err(PipelineError::Internal(panic_message(payload.as_ref()))));
        let error = match outcome {
            Ok(snapshot) => return Ok(snapshot),
            Err(error) => error,
        };
        let failure = PipelineFailure {
            step: progress.step,
            kind: error.kind(),
            last_stage: progress.last_stage,
            message: error.to_string(),
            user_message: error.user_message(),
        };
        match error {
            PipelineError::Cancelled => info!("Pipeline cancelled during {}", failure.step),
            _ => error!("Pipeline failed during {}: {}", failure.step, failure.message),
        }
        (progress.sink)(PipelineEvent::Failed(failure.clone()));
        Err(failure)
    }

    fn run_stages(
        &self,
        request: &PipelineRequest,
        progress: &mut Progress<'_>,
    ) -> Result<PipelineSnapshot, PipelineError> {
        progress.enter(PipelineStep::Startup)?;
        self.providers.ensure_configured()?;
        let model_key = request
            .model_key
            .as_deref()
            .unwrap_or(&self.default_model);
        let generator =
            SequenceGenerator::for_catalog(self.registry.clone(), &self.models, model_key)?;
        if request.max_length == 0 {
            return Err(GenerationError::InvalidConfig("max_length must be at least 1".to_string()).into());
        }

        let awaiting = PipelineSnapshot::awaiting_tokens();
        progress.deliver(&awaiting)?;

        progress.enter(PipelineStep::TokenSelection)?;
        let chosen = self
            .providers
            .select_tokens(&request.prompt, &self.vocabulary)?;
        let prefix = self
            .vocabulary
            .conditioning_prefix(&chosen.selection)
            .map_err(PipelineError::Internal)?;
        let mut tokens_ready = awaiting.advance(PipelineStage::TokensReady);
        tokens_ready.tokens = Field::Ready(TokenOutcome {
            provider: chosen.provider,
            selection: chosen.selection,
            prefix: prefix.as_str().to_string(),
        });
        progress.deliver(&tokens_ready)?;

        progress.enter(PipelineStep::SequenceGeneration)?;
        let raw = generator.generate(&prefix, request.max_length)?;
        progress.enter(PipelineStep::SequenceExtraction)?;
        let sequence = extract(&raw.text, &prefix, request.alphabet)?;
        let mut sequence_ready = tokens_ready.advance(PipelineStage::SequenceReady);
        sequence_ready.sequence = Field::Ready(GeneratedSequence {
            model: raw.model,
            requested_max_length: request.max_length,
            length: sequence.len(),
            residues: sequence.as_str().to_string(),
        });
        progress.deliver(&sequence_ready)?;

        progress.enter(PipelineStep::Annotation)?;
        let annotations = self.annotator.annotate(&sequence);
        progress.enter(PipelineStep::Metrics)?;
        let metrics = compute_metrics(&sequence, &annotations.annotations);
        let mut metrics_ready = sequence_ready.advance(PipelineStage::MetricsReady);
        metrics_ready.metrics = Field::Ready(metrics);
        metrics_ready.annotations = Field::Ready(annotations.clone());
        progress.deliver(&metrics_ready)?;

        progress.enter(PipelineStep::Visualization)?;
        let map = layout_circular_map(
            &map_title(&request.prompt),
            sequence.len(),
            &annotations.annotations,
            &gc_windows(&sequence),
        );
        let mut complete = metrics_ready.advance(PipelineStage::Complete);
        complete.visualization = Field::Ready(map);
        progress.deliver(&complete)?;
        Ok(complete)
    }

    /// Runs the pipeline on a worker thread. Dropping the handle's receiver
    /// cancels the run at the next hand-over.
    pub fn spawn(&self, request: PipelineRequest) -> PipelineHandle {
        let (sender, events) = mpsc::sync_channel(0);
        let cancel = CancellationToken::default();
        let pipeline = self.clone();
        let token = cancel.clone();
        let worker = thread::spawn(move || {
            pipeline.run(&request, &token, |event| sender.send(event).is_ok())
        });
        PipelineHandle {
            events,
            cancel,
            worker,
        }
    }
}

fn map_title(prompt: &str) -> String {
    let prompt = prompt.trim();
    if prompt.chars().count() <= MAP_TITLE_CHARS {
        return prompt.to_string();
    }
    let mut title = prompt.chars().take(MAP_TITLE_CHARS - 3).collect::<String>();
    title.push_str("...");
    title
}

pub struct PipelineHandle {
    pub events: Receiver<PipelineEvent>,
    cancel: CancellationToken,
    worker: JoinHandle<Result<PipelineSnapshot, PipelineFailure>>,
}

impl PipelineHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drains any remaining events and waits for the worker.
    pub fn join(self) -> Result<PipelineSnapshot, PipelineFailure> {
        let Self { events, worker, .. } = self;
        drop(events);
        worker.join().unwrap_or_else(|payload| {
            Err(PipelineFailure {
                step: PipelineStep::Startup,
                kind: FailureKind::Internal,
                last_stage: None,
                message: panic_message(payload.as_ref()),
                user_message: PipelineError::Internal(String::new()).user_message(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{AnnotationEngine, AnnotationInput, AnnotationReport};
    use crate::error::{AnnotationError, ProviderError, ProviderErrorCode};
    use crate::generator::SequenceModel;
    use crate::provider_manager::TokenProvider;
    use crate::sampler::SamplingConfig;
    use crate::signatures;
    use crate::vocabulary::ConditioningPrefix;
    use plasmid_protocol::{AnnotationTier, FeatureType, GcCategory, TokenSelection};
    use std::sync::atomic::AtomicUsize;

    const PROMPT: &str = "high copy expression plasmid for E. coli with ampicillin resistance";

    struct FixedProvider {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl TokenProvider for FixedProvider {
        fn id(&self) -> &str {
            "mock"
        }

        fn convert(
            &self,
            _text: &str,
            _vocabulary: &TokenVocabulary,
        ) -> Result<TokenSelection, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::new("mock", ProviderErrorCode::Transient, "overloaded"));
            }
            Ok(TokenSelection {
                host: Some("<HOST:ECOLI>".to_string()),
                copy: Some("<COPY:HIGH>".to_string()),
                application: Some("<APPLICATION:EXPRESSION>".to_string()),
                resistance: Some("<RESISTANCE:AMP>".to_string()),
                ..TokenSelection::default()
            })
        }
    }

    enum Output {
        Continuation(String),
        /// Repeats the unit well past the requested length.
        Overlong(&'static str),
        Fail,
        Panic,
    }

    struct MockModel(Output);

    impl SequenceModel for MockModel {
        fn key(&self) -> &str {
            "mock"
        }

        fn generate(
            &self,
            prefix: &ConditioningPrefix,
            max_length: usize,
            _config: &SamplingConfig,
        ) -> Result<String, GenerationError> {
            match &self.0 {
                Output::Continuation(text) => Ok(format!("{}{text}", prefix.as_str())),
                Output::Overlong(unit) => Ok(format!(
                    "{}{}",
                    prefix.as_str(),
                    unit.repeat(max_length / unit.len() + 100)
                )),
                Output::Fail => Err(GenerationError::Backend("model endpoint is down".to_string())),
                Output::Panic => panic!("inference crashed"),
            }
        }
    }

    struct BrokenAnnotator;

    impl AnnotationEngine for BrokenAnnotator {
        fn id(&self) -> &str {
            "broken"
        }

        fn annotate(&self, _input: &AnnotationInput) -> Result<AnnotationReport, AnnotationError> {
            Err(AnnotationError::Protocol("library not installed".to_string()))
        }
    }

    fn pipeline_with(providers: ProviderManager, output: Output, annotator: Annotator) -> Pipeline {
        let model: Arc<dyn SequenceModel> = Arc::new(MockModel(output));
        Pipeline::new(
            Arc::new(TokenVocabulary::builtin().expect("vocabulary")),
            Arc::new(providers),
            Arc::new(ModelCatalog::builtin().expect("models")),
            Arc::new(ModelRegistry::new(move |_| Ok(model.clone()))),
            Arc::new(annotator),
        )
        .with_default_model("builtin")
    }

    fn pipeline(output: Output) -> (Pipeline, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = FixedProvider {
            calls: calls.clone(),
            fail: false,
        };
        let providers = ProviderManager::new(vec![Box::new(provider)]);
        (pipeline_with(providers, output, Annotator::default()), calls)
    }

    fn collect(
        pipeline: &Pipeline,
        request: &PipelineRequest,
    ) -> (Vec<PipelineEvent>, Result<PipelineSnapshot, PipelineFailure>) {
        let mut events = vec![];
        let outcome = pipeline.run(request, &CancellationToken::default(), |event| {
            events.push(event);
            true
        });
        (events, outcome)
    }

    fn snapshots(events: &[PipelineEvent]) -> Vec<&PipelineSnapshot> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Snapshot(s) => Some(s),
                PipelineEvent::Failed(_) => None,
            })
            .collect()
    }

    fn failure(events: &[PipelineEvent]) -> &PipelineFailure {
        match events.last() {
            Some(PipelineEvent::Failed(f)) => f,
            other => panic!("expected a failure event, got {other:?}"),
        }
    }

    #[test]
    fn literal_scenario_delivers_five_growing_snapshots() {
        let (pipeline, _) = pipeline(Output::Continuation("ATGC".repeat(125)));
        let (events, outcome) = collect(&pipeline, &PipelineRequest::new(PROMPT));
        let snaps = snapshots(&events);
        assert_eq!(snaps.len(), STAGE_COUNT);
        assert_eq!(snaps[0].ready_field_count(), 0);
        for pair in snaps.windows(2) {
            assert!(pair[1].extends(pair[0]));
        }
        let last = outcome.expect("complete");
        assert!(last.is_complete());
        assert_eq!(&last, snaps[4]);

        let tokens = last.tokens.ready().expect("tokens");
        assert_eq!(tokens.provider, "mock");
        assert_eq!(
            tokens.prefix,
            "<HOST:ECOLI><RESISTANCE:AMP><COPY:HIGH><APPLICATION:EXPRESSION><SEQ>"
        );
        let sequence = last.sequence.ready().expect("sequence");
        assert_eq!(sequence.length, 500);
        assert_eq!(sequence.requested_max_length, DEFAULT_MAX_LENGTH);
        let metrics = last.metrics.ready().expect("metrics");
        assert_eq!(metrics.gc_category, GcCategory::Medium);
        assert!(metrics.orf_list.len() <= 10);
        let map = last.visualization.ready().expect("map");
        assert_eq!(map.center_label, "500 bp");
    }

    #[test]
    fn requested_length_is_honoured_beyond_advisory_limits() {
        for length in [1000, 5000, 10000] {
            let (pipeline, _) = pipeline(Output::Overlong("GATC"));
            let request = PipelineRequest::new(PROMPT).with_max_length(length);
            let (_, outcome) = collect(&pipeline, &request);
            let last = outcome.expect("complete");
            assert_eq!(last.sequence.ready().expect("sequence").length, length);
        }
    }

    #[test]
    fn missing_providers_fail_before_any_snapshot() {
        let pipeline = pipeline_with(
            ProviderManager::new(vec![]),
            Output::Continuation("ACGT".to_string()),
            Annotator::default(),
        );
        let (events, _) = collect(&pipeline, &PipelineRequest::new(PROMPT));
        assert_eq!(events.len(), 1);
        let failed = failure(&events);
        assert_eq!(failed.kind, FailureKind::NoProviderAvailable);
        assert_eq!(failed.step, PipelineStep::Startup);
        assert_eq!(failed.last_stage, None);
    }

    #[test]
    fn exhausted_providers_stop_after_placeholder() {
        let providers = ProviderManager::new(vec![Box::new(FixedProvider {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: true,
        })]);
        let pipeline = pipeline_with(
            providers,
            Output::Continuation("ACGT".to_string()),
            Annotator::default(),
        );
        let (events, _) = collect(&pipeline, &PipelineRequest::new(PROMPT));
        assert_eq!(snapshots(&events).len(), 1);
        let failed = failure(&events);
        assert_eq!(failed.kind, FailureKind::NoProviderAvailable);
        assert_eq!(failed.step, PipelineStep::TokenSelection);
        assert_eq!(failed.last_stage, Some(PipelineStage::AwaitingTokens));
        assert!(!failed.user_message.contains("overloaded"));
    }

    #[test]
    fn generation_failure_stops_after_tokens() {
        let (pipeline, _) = pipeline(Output::Fail);
        let (events, _) = collect(&pipeline, &PipelineRequest::new(PROMPT));
        assert_eq!(snapshots(&events).len(), 2);
        let failed = failure(&events);
        assert_eq!(failed.kind, FailureKind::GenerationError);
        assert_eq!(failed.step, PipelineStep::SequenceGeneration);
        assert_eq!(failed.last_stage, Some(PipelineStage::TokensReady));
    }

    #[test]
    fn invalid_output_is_reported_apart_from_generation_failure() {
        let (pipeline, _) = pipeline(Output::Continuation("ACGTXACGT".to_string()));
        let (events, _) = collect(&pipeline, &PipelineRequest::new(PROMPT));
        let failed = failure(&events);
        assert_eq!(failed.kind, FailureKind::InvalidSequence);
        assert_eq!(failed.step, PipelineStep::SequenceExtraction);
        assert!(failed.message.contains("position 5"));
        assert_ne!(
            failed.user_message,
            PipelineError::Generation(GenerationError::EmptyOutput).user_message()
        );
    }

    #[test]
    fn panics_become_internal_failures_with_their_step() {
        let (pipeline, _) = pipeline(Output::Panic);
        let (events, _) = collect(&pipeline, &PipelineRequest::new(PROMPT));
        let failed = failure(&events);
        assert_eq!(failed.kind, FailureKind::Internal);
        assert_eq!(failed.step, PipelineStep::SequenceGeneration);
        assert!(failed.message.contains("inference crashed"));
    }

    #[test]
    fn broken_annotator_never_stops_the_pipeline() {
        let motif = signatures::find("T7 promoter").expect("T7").motif;
        let continuation = format!("{}{motif}{}", "ACGT".repeat(30), "TTGA".repeat(30));
        let pipeline = pipeline_with(
            ProviderManager::new(vec![Box::new(FixedProvider {
                calls: Arc::new(AtomicUsize::new(0)),
                fail: false,
            })]),
            Output::Continuation(continuation),
            Annotator::new(Some(Box::new(BrokenAnnotator))),
        );
        let (_, outcome) = collect(&pipeline, &PipelineRequest::new(PROMPT));
        let last = outcome.expect("complete");
        let annotations = last.annotations.ready().expect("annotations");
        assert_eq!(annotations.tier, AnnotationTier::Fallback);
        assert!(
            annotations
                .annotations
                .iter()
                .any(|a| a.feature_type == FeatureType::Promoter)
        );
    }

    #[test]
    fn cancellation_between_stages_stops_the_run() {
        let (pipeline, calls) = pipeline(Output::Continuation("ACGT".to_string()));
        let cancel = CancellationToken::default();
        let token = cancel.clone();
        let mut events = vec![];
        let outcome = pipeline.run(&PipelineRequest::new(PROMPT), &cancel, |event| {
            token.cancel();
            events.push(event);
            true
        });
        assert!(outcome.is_err());
        assert_eq!(snapshots(&events).len(), 1);
        assert_eq!(failure(&events).kind, FailureKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn spawned_run_streams_snapshots_in_order() {
        let (pipeline, _) = pipeline(Output::Continuation("ATGC".repeat(100)));
        let handle = pipeline.spawn(PipelineRequest::new(PROMPT));
        let versions = handle
            .events
            .iter()
            .map(|event| match event {
                PipelineEvent::Snapshot(s) => s.version,
                PipelineEvent::Failed(f) => panic!("failed: {}", f.message),
            })
            .collect::<Vec<_>>();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert!(handle.join().expect("complete").is_complete());
    }

    #[test]
    fn dropped_receiver_cancels_the_worker() {
        let (pipeline, _) = pipeline(Output::Continuation("ATGC".repeat(100)));
        let handle = pipeline.spawn(PipelineRequest::new(PROMPT));
        let first = handle.events.recv().expect("first snapshot");
        assert!(matches!(first, PipelineEvent::Snapshot(ref s) if s.version == 1));
        let failed = handle.join().expect_err("cancelled");
        assert_eq!(failed.kind, FailureKind::Cancelled);
        assert_eq!(failed.last_stage, Some(PipelineStage::AwaitingTokens));
    }

    #[test]
    fn unknown_model_fails_at_startup() {
        let (pipeline, _) = pipeline(Output::Continuation("ACGT".to_string()));
        let request = PipelineRequest::new(PROMPT).with_model("1b");
        let (events, _) = collect(&pipeline, &request);
        let failed = failure(&events);
        assert_eq!(failed.kind, FailureKind::GenerationError);
        assert_eq!(failed.step, PipelineStep::Startup);
    }

    #[test]
    fn offline_settings_run_end_to_end() {
        let pipeline = Pipeline::from_settings(&Settings::default(), true).expect("pipeline");
        assert_eq!(pipeline.default_model(), "builtin");
        let request = PipelineRequest::new(PROMPT).with_max_length(1200);
        let (events, outcome) = collect(&pipeline, &request);
        assert_eq!(snapshots(&events).len(), STAGE_COUNT);
        let last = outcome.expect("complete");
        let tokens = last.tokens.ready().expect("tokens");
        assert_eq!(tokens.provider, "keywords");
        assert_eq!(tokens.selection.host.as_deref(), Some("<HOST:ECOLI>"));
        assert_eq!(last.sequence.ready().expect("sequence").length, 1200);
    }
}
