//! Feature annotation in two tiers: an external annotation tool when one is
//! configured, and the built-in signature and ORF scan otherwise.

use crate::config::Settings;
use crate::error::AnnotationError;
use crate::extract::{Alphabet, Sequence};
use crate::open_reading_frame::{ReadingFrames, first_orfs};
use crate::provider_manager::panic_message;
use crate::signatures;
use log::{debug, info, warn};
use plasmid_protocol::{
    ANNOTATION_REQUEST_SCHEMA, Annotation, AnnotationSummary, AnnotationTier, FeatureType, Strand,
    count_feature_types,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_INPUT_NAME: &str = "generated_plasmid";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
enum InputSource {
    Sequence(String),
    Path(PathBuf),
}

/// What an engine is asked to annotate. The pipeline always hands over the
/// sequence in memory; file input exists for the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationInput {
    source: InputSource,
    pub name: String,
    pub run_orf_prediction: bool,
}

impl AnnotationInput {
    pub fn from_sequence(sequence: &Sequence) -> Self {
        Self {
            source: InputSource::Sequence(sequence.as_str().to_string()),
            name: DEFAULT_INPUT_NAME.to_string(),
            run_orf_prediction: true,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self {
            source: InputSource::Path(path.to_path_buf()),
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| DEFAULT_INPUT_NAME.to_string()),
            run_orf_prediction: true,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_orf_prediction(mut self, run: bool) -> Self {
        self.run_orf_prediction = run;
        self
    }

    /// The residues to annotate. Files may be FASTA (first record) or bare
    /// sequence text.
    pub fn residues(&self) -> Result<Sequence, AnnotationError> {
        match &self.source {
            InputSource::Sequence(residues) => Sequence::parse(residues, Alphabet::Iupac)
                .map_err(|e| AnnotationError::Input(e.to_string())),
            InputSource::Path(path) => read_sequence_file(path),
        }
    }

    pub fn request_json(&self) -> Value {
        let mut request = json!({
            "schema": ANNOTATION_REQUEST_SCHEMA,
            "name": self.name,
            "run_orf_prediction": self.run_orf_prediction,
        });
        match &self.source {
            InputSource::Sequence(residues) => request["sequence"] = json!(residues),
            InputSource::Path(path) => request["path"] = json!(path.display().to_string()),
        }
        request
    }
}

pub fn read_sequence_file(path: &Path) -> Result<Sequence, AnnotationError> {
    let io_error = |e: std::io::Error| AnnotationError::Input(format!("{}: {e}", path.display()));
    let mut text = String::new();
    File::open(path)
        .and_then(|mut file| file.read_to_string(&mut text))
        .map_err(io_error)?;
    let residues = if text.trim_start().starts_with('>') {
        let reader = bio::io::fasta::Reader::new(text.as_bytes());
        let record = reader
            .records()
            .next()
            .ok_or_else(|| AnnotationError::Input(format!("{}: no FASTA record", path.display())))?
            .map_err(io_error)?;
        String::from_utf8_lossy(record.seq()).to_string()
    } else {
        text
    };
    Sequence::parse(&residues, Alphabet::Iupac)
        .map_err(|e| AnnotationError::Input(format!("{}: {e}", path.display())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationReport {
    pub annotations: Vec<Annotation>,
    pub feature_counts: BTreeMap<String, usize>,
}

impl AnnotationReport {
    /// Sorts by position and derives the per-type counts.
    pub fn new(mut annotations: Vec<Annotation>) -> Self {
        annotations.sort_by(|a, b| (a.start, a.end, &a.name).cmp(&(b.start, b.end, &b.name)));
        let feature_counts = count_feature_types(&annotations);
        Self {
            annotations,
            feature_counts,
        }
    }
}

pub trait AnnotationEngine: Send + Sync {
    fn id(&self) -> &str;
    fn annotate(&self, input: &AnnotationInput) -> Result<AnnotationReport, AnnotationError>;
}

#[derive(Debug, Deserialize)]
struct RawAnnotation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type", alias = "feature_type", alias = "kind")]
    feature_type: Option<String>,
    start: i64,
    end: i64,
    #[serde(default)]
    strand: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawReport {
    Wrapped { annotations: Vec<RawAnnotation> },
    Bare(Vec<RawAnnotation>),
}

fn parse_strand(value: Option<&Value>) -> Strand {
    let raw = match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Strand::Forward,
    };
    Strand::parse(&raw).unwrap_or(Strand::Forward)
}

/// Parses an annotator's stdout. Features outside `[1, sequence_len]` are
/// dropped and the counts recomputed from what remains.
pub fn parse_report(stdout: &str, sequence_len: usize) -> Result<AnnotationReport, AnnotationError> {
    let raw = serde_json::from_str::<RawReport>(stdout.trim())
        .map_err(|e| AnnotationError::Protocol(format!("invalid annotator output: {e}")))?;
    let raw = match raw {
        RawReport::Wrapped { annotations } | RawReport::Bare(annotations) => annotations,
    };
    let total = raw.len();
    let annotations = raw
        .into_iter()
        .filter_map(|r| {
            let start = usize::try_from(r.start).ok()?;
            let end = usize::try_from(r.end).ok()?;
            let feature_type = r
                .feature_type
                .as_deref()
                .map(FeatureType::from_label)
                .unwrap_or(FeatureType::Other);
            let name = r
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| feature_type.as_str().to_string());
            let annotation = Annotation::new(name, feature_type, start, end, parse_strand(r.strand.as_ref()));
            annotation.fits(sequence_len).then_some(annotation)
        })
        .collect::<Vec<_>>();
    if annotations.len() < total {
        debug!(
            "Discarded {} annotator feature(s) outside 1..{sequence_len}",
            total - annotations.len()
        );
    }
    Ok(AnnotationReport::new(annotations))
}

/// An annotation tool speaking JSON over stdin and stdout.
pub struct ExternalAnnotator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalAnnotator {
    pub fn new(program: &str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args,
            timeout,
        }
    }

    /// Splits a command line on whitespace; quoting is not supported.
    pub fn from_command_line(command: &str, timeout: Duration) -> Result<Self, AnnotationError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| AnnotationError::Input("empty annotator command".to_string()))?;
        Ok(Self::new(&program, parts.collect(), timeout))
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn run(&self, request: String) -> Result<(ExitStatus, String, String), AnnotationError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AnnotationError::Spawn {
                command: self.command_line(),
                source,
            })?;
        // Feeding stdin from its own thread keeps a tool that answers before
        // reading everything from blocking us.
        if let Some(mut stdin) = child.stdin.take() {
            thread::spawn(move || {
                let _ = stdin.write_all(request.as_bytes());
            });
        }
        let drain = |pipe: Option<Box<dyn Read + Send>>| {
            pipe.map(|mut pipe| {
                thread::spawn(move || {
                    let mut buf = Vec::new();
                    let _ = pipe.read_to_end(&mut buf);
                    buf
                })
            })
        };
        let stdout = drain(child.stdout.take().map(|p| Box::new(p) as Box<dyn Read + Send>));
        let stderr = drain(child.stderr.take().map(|p| Box::new(p) as Box<dyn Read + Send>));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AnnotationError::Timeout(self.timeout));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    return Err(AnnotationError::Spawn {
                        command: self.command_line(),
                        source,
                    });
                }
            }
        };
        let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
            handle
                .and_then(|h| h.join().ok())
                .map(|buf| String::from_utf8_lossy(&buf).to_string())
                .unwrap_or_default()
        };
        Ok((status, collect(stdout), collect(stderr)))
    }
}

impl AnnotationEngine for ExternalAnnotator {
    fn id(&self) -> &str {
        &self.program
    }

    fn annotate(&self, input: &AnnotationInput) -> Result<AnnotationReport, AnnotationError> {
        let sequence = input.residues()?;
        let (status, stdout, stderr) = self.run(input.request_json().to_string())?;
        if !status.success() {
            return Err(AnnotationError::Exit {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        parse_report(&stdout, sequence.len())
    }
}

/// Signature library plus six-frame ORF prediction.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnnotator;

impl AnnotationEngine for HeuristicAnnotator {
    fn id(&self) -> &str {
        "heuristic"
    }

    fn annotate(&self, input: &AnnotationInput) -> Result<AnnotationReport, AnnotationError> {
        let sequence = input.residues()?;
        let mut annotations = signatures::scan(sequence.as_bytes());
        if input.run_orf_prediction {
            let orfs = first_orfs(sequence.as_bytes(), ReadingFrames::SixFrame);
            annotations.extend(orfs.into_iter().enumerate().map(|(n, orf)| {
                Annotation::new(
                    format!("ORF {}", n + 1),
                    FeatureType::Cds,
                    orf.start,
                    orf.end,
                    orf.strand,
                )
            }));
        }
        Ok(AnnotationReport::new(annotations))
    }
}

/// Runs the primary engine and falls back to the heuristic one on any error
/// or panic. Never fails.
pub struct Annotator {
    primary: Option<Box<dyn AnnotationEngine>>,
    fallback: Box<dyn AnnotationEngine>,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Annotator {
    pub fn new(primary: Option<Box<dyn AnnotationEngine>>) -> Self {
        Self {
            primary,
            fallback: Box::new(HeuristicAnnotator),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let primary = settings.annotator_command.as_deref().and_then(|command| {
            let timeout = Duration::from_secs(settings.annotator_timeout_secs);
            match ExternalAnnotator::from_command_line(command, timeout) {
                Ok(engine) => Some(Box::new(engine) as Box<dyn AnnotationEngine>),
                Err(e) => {
                    warn!("Ignoring annotator command: {e}");
                    None
                }
            }
        });
        Self::new(primary)
    }

    pub fn primary_id(&self) -> Option<&str> {
        self.primary.as_ref().map(|p| p.id())
    }

    fn try_engine(
        engine: &dyn AnnotationEngine,
        input: &AnnotationInput,
    ) -> Result<AnnotationReport, String> {
        match catch_unwind(AssertUnwindSafe(|| engine.annotate(input))) {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(AnnotationError::Panic(panic_message(payload.as_ref())).to_string()),
        }
    }

    pub fn annotate(&self, sequence: &Sequence) -> AnnotationSummary {
        self.annotate_input(&AnnotationInput::from_sequence(sequence))
    }

    pub fn annotate_input(&self, input: &AnnotationInput) -> AnnotationSummary {
        let mut note = None;
        if let Some(primary) = &self.primary {
            match Self::try_engine(primary.as_ref(), input) {
                Ok(report) => {
                    info!(
                        "Annotated with '{}': {} feature(s)",
                        primary.id(),
                        report.annotations.len()
                    );
                    return summary(AnnotationTier::Primary, primary.id(), report, None);
                }
                Err(message) => {
                    warn!(
                        "Primary annotator '{}' failed, using heuristics: {message}",
                        primary.id()
                    );
                    note = Some(format!("Primary annotator unavailable: {message}"));
                }
            }
        }
        match Self::try_engine(self.fallback.as_ref(), input) {
            Ok(report) => summary(AnnotationTier::Fallback, self.fallback.id(), report, note),
            Err(message) => {
                warn!("Heuristic annotation failed: {message}");
                let note = match note {
                    Some(primary) => format!("{primary}; heuristics failed: {message}"),
                    None => format!("Heuristics failed: {message}"),
                };
                summary(
                    AnnotationTier::Fallback,
                    self.fallback.id(),
                    AnnotationReport::new(vec![]),
                    Some(note),
                )
            }
        }
    }
}

fn summary(
    tier: AnnotationTier,
    engine: &str,
    report: AnnotationReport,
    note: Option<String>,
) -> AnnotationSummary {
    AnnotationSummary {
        tier,
        engine: engine.to_string(),
        annotations: report.annotations,
        feature_counts: report.feature_counts,
        note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures;

    enum Behaviour {
        Fail,
        Panic,
        Succeed,
    }

    struct MockEngine(Behaviour);

    impl AnnotationEngine for MockEngine {
        fn id(&self) -> &str {
            "mock"
        }

        fn annotate(&self, _input: &AnnotationInput) -> Result<AnnotationReport, AnnotationError> {
            match self.0 {
                Behaviour::Fail => Err(AnnotationError::Protocol("library missing".to_string())),
                Behaviour::Panic => panic!("annotation library crashed"),
                Behaviour::Succeed => Ok(AnnotationReport::new(vec![Annotation::new(
                    "lac promoter",
                    FeatureType::Promoter,
                    1,
                    24,
                    Strand::Forward,
                )])),
            }
        }
    }

    fn planted() -> Sequence {
        let motif = signatures::find("T7 promoter").expect("T7").motif;
        let text = format!("{}{motif}{}", "ACGT".repeat(25), "CCGA".repeat(25));
        Sequence::parse(&text, Alphabet::Strict).expect("sequence")
    }

    #[test]
    fn failing_primary_falls_back_to_signatures() {
        for behaviour in [Behaviour::Fail, Behaviour::Panic] {
            let annotator = Annotator::new(Some(Box::new(MockEngine(behaviour))));
            let summary = annotator.annotate(&planted());
            assert_eq!(summary.tier, AnnotationTier::Fallback);
            assert!(summary.note.is_some());
            let promoter = summary
                .annotations
                .iter()
                .find(|a| a.feature_type == FeatureType::Promoter)
                .expect("planted promoter");
            assert_eq!((promoter.start, promoter.end), (101, 120));
            assert_eq!(summary.feature_counts.get("promoter"), Some(&1));
        }
    }

    #[test]
    fn working_primary_is_used() {
        let annotator = Annotator::new(Some(Box::new(MockEngine(Behaviour::Succeed))));
        let summary = annotator.annotate(&planted());
        assert_eq!(summary.tier, AnnotationTier::Primary);
        assert_eq!(summary.engine, "mock");
        assert_eq!(summary.annotations.len(), 1);
        assert_eq!(summary.note, None);
    }

    #[test]
    fn heuristic_reports_orfs_as_cds() {
        let orf = format!("ATG{}TAA", "GCC".repeat(120));
        let text = format!("CC{orf}CC");
        let sequence = Sequence::parse(&text, Alphabet::Strict).expect("sequence");
        let report = HeuristicAnnotator
            .annotate(&AnnotationInput::from_sequence(&sequence))
            .expect("report");
        let cds = report
            .annotations
            .iter()
            .find(|a| a.feature_type == FeatureType::Cds)
            .expect("orf");
        assert_eq!(cds.name, "ORF 1");
        assert_eq!((cds.start, cds.end), (3, 368));
        let without = HeuristicAnnotator
            .annotate(&AnnotationInput::from_sequence(&sequence).with_orf_prediction(false))
            .expect("report");
        assert!(without.annotations.iter().all(|a| a.feature_type != FeatureType::Cds));
    }

    #[test]
    fn report_parsing_is_lenient_but_bounded() {
        let stdout = r#"{"annotations":[
            {"name":"lac promoter","type":"promoter","start":5,"end":30,"strand":1},
            {"name":"bla","type":"Resistance_Marker","start":40,"end":90,"strand":"-"},
            {"name":"too long","type":"cds","start":0,"end":9999,"strand":"+"},
            {"type":"ori","start":91,"end":100}
        ],"feature_counts":{"promoter":99}}"#;
        let report = parse_report(stdout, 100).expect("report");
        assert_eq!(report.annotations.len(), 3);
        assert_eq!(report.annotations[1].feature_type, FeatureType::Marker);
        assert_eq!(report.annotations[1].strand, Strand::Reverse);
        assert_eq!(report.annotations[2].name, "rep_origin");
        assert_eq!(report.feature_counts.get("promoter"), Some(&1));
        assert!(parse_report("not json", 100).is_err());
    }

    #[test]
    fn request_carries_sequence_in_memory() {
        let input = AnnotationInput::from_sequence(&planted()).with_name("demo");
        let request = input.request_json();
        assert_eq!(request["schema"], json!(ANNOTATION_REQUEST_SCHEMA));
        assert_eq!(request["name"], json!("demo"));
        assert_eq!(request["run_orf_prediction"], json!(true));
        assert_eq!(request["sequence"].as_str().map(str::len), Some(220));
        assert!(request.get("path").is_none());
    }

    #[test]
    fn fasta_file_input_is_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("demo.fasta");
        std::fs::write(&path, ">demo plasmid\nACGTACGT\nggcc\n").expect("write");
        let input = AnnotationInput::from_path(&path);
        assert_eq!(input.name, "demo");
        assert_eq!(input.residues().expect("residues").as_str(), "ACGTACGTGGCC");
        assert!(input.request_json()["path"].is_string());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let engine = ExternalAnnotator::new(
            "/nonexistent/plasmid-annotator",
            vec![],
            Duration::from_secs(1),
        );
        let input = AnnotationInput::from_sequence(&planted());
        assert!(matches!(
            engine.annotate(&input),
            Err(AnnotationError::Spawn { .. })
        ));
        assert!(ExternalAnnotator::from_command_line("   ", Duration::from_secs(1)).is_err());
    }

    #[cfg(unix)]
    fn shell(script: &str, timeout: Duration) -> ExternalAnnotator {
        ExternalAnnotator::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    #[cfg(unix)]
    #[test]
    fn external_tool_output_is_parsed() {
        let engine = shell(
            r#"cat >/dev/null; echo '{"annotations":[{"name":"T7 promoter","type":"promoter","start":101,"end":120,"strand":"+"},{"name":"off the end","type":"cds","start":200,"end":400,"strand":"+"}]}'"#,
            Duration::from_secs(10),
        );
        let report = engine
            .annotate(&AnnotationInput::from_sequence(&planted()))
            .expect("report");
        assert_eq!(report.annotations.len(), 1);
        assert_eq!(report.annotations[0].name, "T7 promoter");
    }

    #[cfg(unix)]
    #[test]
    fn external_tool_failures_are_classified() {
        let input = AnnotationInput::from_sequence(&planted());
        let failing = shell("cat >/dev/null; echo oops >&2; exit 3", Duration::from_secs(10));
        match failing.annotate(&input) {
            Err(AnnotationError::Exit { stderr, .. }) => assert_eq!(stderr, "oops"),
            other => panic!("unexpected {other:?}"),
        }
        let slow = shell("sleep 5", Duration::from_millis(200));
        assert!(matches!(
            slow.annotate(&input),
            Err(AnnotationError::Timeout(_))
        ));
    }
}
