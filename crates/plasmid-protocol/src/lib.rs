//! Shared machine-readable contracts for the PlasmidGPT pipeline.
//!
//! Everything here is plain data: the CLI, the MCP server and the renderer
//! exchange these types as JSON without depending on the pipeline itself.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fmt;

pub const SNAPSHOT_SCHEMA: &str = "plasmid_gpt.snapshot.v1";
pub const ANNOTATION_REQUEST_SCHEMA: &str = "plasmid_gpt.annotation_request.v1";
pub const STAGE_COUNT: usize = 5;

/// The nine conditioning-token categories, in the order used to build the
/// conditioning prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenCategory {
    Host,
    Resistance,
    Copy,
    Origin,
    Promoter,
    Tag,
    Application,
    Gc,
    Size,
}

impl TokenCategory {
    pub const ALL: [TokenCategory; 9] = [
        TokenCategory::Host,
        TokenCategory::Resistance,
        TokenCategory::Copy,
        TokenCategory::Origin,
        TokenCategory::Promoter,
        TokenCategory::Tag,
        TokenCategory::Application,
        TokenCategory::Gc,
        TokenCategory::Size,
    ];

    /// Lower-case key used in provider JSON payloads.
    pub fn key(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Resistance => "resistance",
            Self::Copy => "copy",
            Self::Origin => "origin",
            Self::Promoter => "promoter",
            Self::Tag => "tag",
            Self::Application => "application",
            Self::Gc => "gc",
            Self::Size => "size",
        }
    }

    /// Upper-case name used inside `<CATEGORY:VALUE>` tokens.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Host => "HOST",
            Self::Resistance => "RESISTANCE",
            Self::Copy => "COPY",
            Self::Origin => "ORIGIN",
            Self::Promoter => "PROMOTER",
            Self::Tag => "TAG",
            Self::Application => "APPLICATION",
            Self::Gc => "GC",
            Self::Size => "SIZE",
        }
    }

    /// Accepts either the payload key or the token prefix, in any case.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.key().eq_ignore_ascii_case(raw) || c.prefix().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for TokenCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// At most one token per category. Absence means "no preference".
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSelection {
    pub host: Option<String>,
    pub resistance: Option<String>,
    pub copy: Option<String>,
    pub origin: Option<String>,
    pub promoter: Option<String>,
    pub tag: Option<String>,
    pub application: Option<String>,
    pub gc: Option<String>,
    pub size: Option<String>,
}

impl TokenSelection {
    pub fn get(&self, category: TokenCategory) -> Option<&str> {
        match category {
            TokenCategory::Host => self.host.as_deref(),
            TokenCategory::Resistance => self.resistance.as_deref(),
            TokenCategory::Copy => self.copy.as_deref(),
            TokenCategory::Origin => self.origin.as_deref(),
            TokenCategory::Promoter => self.promoter.as_deref(),
            TokenCategory::Tag => self.tag.as_deref(),
            TokenCategory::Application => self.application.as_deref(),
            TokenCategory::Gc => self.gc.as_deref(),
            TokenCategory::Size => self.size.as_deref(),
        }
    }

    pub fn set(&mut self, category: TokenCategory, token: Option<String>) {
        let slot = match category {
            TokenCategory::Host => &mut self.host,
            TokenCategory::Resistance => &mut self.resistance,
            TokenCategory::Copy => &mut self.copy,
            TokenCategory::Origin => &mut self.origin,
            TokenCategory::Promoter => &mut self.promoter,
            TokenCategory::Tag => &mut self.tag,
            TokenCategory::Application => &mut self.application,
            TokenCategory::Gc => &mut self.gc,
            TokenCategory::Size => &mut self.size,
        };
        *slot = token;
    }

    /// Selected tokens in canonical category order.
    pub fn iter(&self) -> impl Iterator<Item = (TokenCategory, &str)> + '_ {
        TokenCategory::ALL
            .into_iter()
            .filter_map(|category| self.get(category).map(|token| (category, token)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    RepOrigin,
    Marker,
    Promoter,
    Terminator,
    Cds,
    Other,
}

impl FeatureType {
    pub const ALL: [FeatureType; 6] = [
        FeatureType::RepOrigin,
        FeatureType::Marker,
        FeatureType::Promoter,
        FeatureType::Terminator,
        FeatureType::Cds,
        FeatureType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RepOrigin => "rep_origin",
            Self::Marker => "marker",
            Self::Promoter => "promoter",
            Self::Terminator => "terminator",
            Self::Cds => "cds",
            Self::Other => "other",
        }
    }

    /// Maps the loose type labels of external annotation tools onto the
    /// closed set. Unknown labels become `Other`.
    pub fn from_label(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rep_origin" | "origin" | "ori" | "origin_of_replication" => Self::RepOrigin,
            "marker" | "resistance_marker" | "selectable_marker" | "antibiotic_resistance" => {
                Self::Marker
            }
            "promoter" => Self::Promoter,
            "terminator" => Self::Terminator,
            "cds" | "orf" | "gene" => Self::Cds,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
}

impl Strand {
    pub fn as_char(self) -> char {
        match self {
            Self::Forward => '+',
            Self::Reverse => '-',
        }
    }

    /// Accepts `+`/`-`, `1`/`-1` and `forward`/`reverse`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "+" | "1" | "+1" | "forward" | "fwd" => Some(Self::Forward),
            "-" | "-1" | "reverse" | "rev" => Some(Self::Reverse),
            _ => None,
        }
    }
}

/// A located feature. Coordinates are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    pub start: usize,
    pub end: usize,
    pub strand: Strand,
}

impl Annotation {
    pub fn new(
        name: impl Into<String>,
        feature_type: FeatureType,
        start: usize,
        end: usize,
        strand: Strand,
    ) -> Self {
        Self {
            name: name.into(),
            feature_type,
            start,
            end,
            strand,
        }
    }

    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// True when the feature lies within a sequence of `sequence_len` bases.
    pub fn fits(&self, sequence_len: usize) -> bool {
        self.start >= 1 && self.start <= self.end && self.end <= sequence_len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationTier {
    Primary,
    Fallback,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSummary {
    pub tier: AnnotationTier,
    pub engine: String,
    pub annotations: Vec<Annotation>,
    pub feature_counts: BTreeMap<String, usize>,
    pub note: Option<String>,
}

pub fn count_feature_types(annotations: &[Annotation]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for annotation in annotations {
        *counts
            .entry(annotation.feature_type.as_str().to_string())
            .or_insert(0) += 1;
    }
    counts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcCategory {
    Low,
    Medium,
    High,
}

impl GcCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low (<40%)",
            Self::Medium => "Medium (40-55%)",
            Self::High => "High (>55%)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyNumberCategory {
    High,
    Medium,
    Low,
}

impl CopyNumberCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::High => "High (>100 copies/cell)",
            Self::Medium => "Medium (15-100 copies/cell)",
            Self::Low => "Low (1-15 copies/cell)",
        }
    }
}

/// What a copy-number estimate was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CopyNumberBasis {
    Origin { name: String },
    Length { length: usize },
}

/// Best-effort classification, not a measured copy number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyNumberEstimate {
    pub category: CopyNumberCategory,
    pub basis: CopyNumberBasis,
}

/// An open reading frame, 1-based inclusive including the stop codon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrfSpan {
    pub start: usize,
    pub end: usize,
    pub frame: i8,
    pub strand: Strand,
}

impl OrfSpan {
    pub fn length(&self) -> usize {
        self.end + 1 - self.start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub sequence_length: usize,
    pub gc_content_fraction: f64,
    pub gc_category: GcCategory,
    pub copy_number: CopyNumberEstimate,
    pub orf_list: Vec<OrfSpan>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcWindow {
    pub start: usize,
    pub end: usize,
    pub fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapRing {
    Outer,
    Inner,
}

/// One feature arc. Angles are degrees clockwise from twelve o'clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapArc {
    pub label: String,
    pub feature_type: FeatureType,
    pub strand: Strand,
    pub start: usize,
    pub end: usize,
    pub start_angle: f64,
    pub end_angle: f64,
    pub ring: MapRing,
    pub color: String,
    pub hover: String,
}

/// Renderer-independent description of a circular plasmid map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircularMap {
    pub title: String,
    pub sequence_length: usize,
    pub center_label: String,
    pub arcs: Vec<MapArc>,
    pub gc_ring: Vec<GcWindow>,
}

/// A snapshot field that is either not yet computed or final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Field<T> {
    Pending,
    Ready(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Pending
    }
}

impl<T> Field<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Field::Ready(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Field::Ready(value) => Some(value),
            Field::Pending => None,
        }
    }
}

impl<T: PartialEq> Field<T> {
    /// A populated field must stay populated and unchanged.
    fn preserves(&self, previous: &Field<T>) -> bool {
        match previous {
            Field::Pending => true,
            Field::Ready(before) => matches!(self, Field::Ready(now) if now == before),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutcome {
    pub provider: String,
    pub selection: TokenSelection,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSequence {
    pub model: String,
    pub requested_max_length: usize,
    pub length: usize,
    pub residues: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    AwaitingTokens,
    TokensReady,
    SequenceReady,
    MetricsReady,
    Complete,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; STAGE_COUNT] = [
        PipelineStage::AwaitingTokens,
        PipelineStage::TokensReady,
        PipelineStage::SequenceReady,
        PipelineStage::MetricsReady,
        PipelineStage::Complete,
    ];

    /// 1-based position, equal to the snapshot version.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::AwaitingTokens => 1,
            Self::TokensReady => 2,
            Self::SequenceReady => 3,
            Self::MetricsReady => 4,
            Self::Complete => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingTokens => "awaiting_tokens",
            Self::TokensReady => "tokens_ready",
            Self::SequenceReady => "sequence_ready",
            Self::MetricsReady => "metrics_ready",
            Self::Complete => "complete",
        }
    }

    pub fn status_message(self) -> &'static str {
        match self {
            Self::AwaitingTokens => "Converting prompt to conditioning tokens...",
            Self::TokensReady => "Tokens ready. Generating DNA sequence...",
            Self::SequenceReady => "Sequence ready. Annotating and computing metrics...",
            Self::MetricsReady => "Metrics ready. Rendering plasmid map...",
            Self::Complete => "Plasmid generation complete.",
        }
    }
}

/// The component call a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Startup,
    TokenSelection,
    SequenceGeneration,
    SequenceExtraction,
    Annotation,
    Metrics,
    Visualization,
}

impl PipelineStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::TokenSelection => "token_selection",
            Self::SequenceGeneration => "sequence_generation",
            Self::SequenceExtraction => "sequence_extraction",
            Self::Annotation => "annotation",
            Self::Metrics => "metrics",
            Self::Visualization => "visualization",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoProviderAvailable,
    GenerationError,
    InvalidSequence,
    Cancelled,
    Internal,
}

/// Terminal failure event. `last_stage` is the last snapshot delivered, if any.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub step: PipelineStep,
    pub kind: FailureKind,
    pub last_stage: Option<PipelineStage>,
    pub message: String,
    pub user_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub schema: String,
    pub version: u8,
    pub stage: PipelineStage,
    pub status: String,
    pub tokens: Field<TokenOutcome>,
    pub sequence: Field<GeneratedSequence>,
    pub metrics: Field<Metrics>,
    pub annotations: Field<AnnotationSummary>,
    pub visualization: Field<CircularMap>,
}

impl PipelineSnapshot {
    /// The first snapshot: every field pending.
    pub fn awaiting_tokens() -> Self {
        Self {
            schema: SNAPSHOT_SCHEMA.to_string(),
            version: PipelineStage::AwaitingTokens.ordinal(),
            stage: PipelineStage::AwaitingTokens,
            status: PipelineStage::AwaitingTokens.status_message().to_string(),
            tokens: Field::Pending,
            sequence: Field::Pending,
            metrics: Field::Pending,
            annotations: Field::Pending,
            visualization: Field::Pending,
        }
    }

    /// Copy of `self` moved to `stage`; the caller then fills the new field.
    pub fn advance(&self, stage: PipelineStage) -> Self {
        let mut next = self.clone();
        next.version = stage.ordinal();
        next.stage = stage;
        next.status = stage.status_message().to_string();
        next
    }

    pub fn ready_field_count(&self) -> usize {
        [
            self.tokens.is_ready(),
            self.sequence.is_ready(),
            self.metrics.is_ready(),
            self.annotations.is_ready(),
            self.visualization.is_ready(),
        ]
        .into_iter()
        .filter(|ready| *ready)
        .count()
    }

    /// True when `self` is the direct successor of `previous`: next version,
    /// strictly more populated, and no populated field regressed or changed.
    pub fn extends(&self, previous: &PipelineSnapshot) -> bool {
        self.version == previous.version + 1
            && self.stage > previous.stage
            && self.ready_field_count() > previous.ready_field_count()
            && self.tokens.preserves(&previous.tokens)
            && self.sequence.preserves(&previous.sequence)
            && self.metrics.preserves(&previous.metrics)
            && self.annotations.preserves(&previous.annotations)
            && self.visualization.preserves(&previous.visualization)
    }

    pub fn is_complete(&self) -> bool {
        self.stage == PipelineStage::Complete
    }
}
