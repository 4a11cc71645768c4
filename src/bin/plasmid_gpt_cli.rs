use plasmid_gpt::{
    about,
    annotate::{AnnotationInput, Annotator, read_sequence_file},
    config::{DEFAULT_MAX_LENGTH, Settings},
    export::{write_fasta, write_genbank, write_svg},
    extract::{Alphabet, Sequence},
    llm_bridge::provider_availability,
    logging::set_up_logging,
    metrics::compute_metrics,
    pipeline::{Pipeline, PipelineEvent, PipelineRequest},
};
use plasmid_protocol::{PipelineSnapshot, STAGE_COUNT};
use plasmid_render::annotation_table_markdown;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::env;

fn usage() {
    eprintln!(
        "Usage:\n  \
  plasmid_gpt_cli --version\n  \
  plasmid_gpt_cli [-v|-vv] generate PROMPT [--model KEY] [--max-length N] [--offline] [--strict]\n  \
                  [--name NAME] [--fasta PATH] [--genbank PATH] [--svg PATH] [--json]\n  \
  plasmid_gpt_cli [-v|-vv] annotate SEQUENCE|@FILE [--json]\n  \
  plasmid_gpt_cli vocabulary [--json]\n  \
  plasmid_gpt_cli providers\n  \
  plasmid_gpt_cli models\n\n  \
  Default max length: {DEFAULT_MAX_LENGTH}\n  \
  --offline uses the keyword token matcher and the builtin model"
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

#[derive(Debug, Default)]
struct GenerateArgs {
    prompt: String,
    model: Option<String>,
    max_length: Option<usize>,
    offline: bool,
    strict: bool,
    name: Option<String>,
    fasta: Option<PathBuf>,
    genbank: Option<PathBuf>,
    svg: Option<PathBuf>,
    json: bool,
}

fn option_value<'a>(args: &'a [String], idx: usize) -> Result<&'a str, String> {
    args.get(idx + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing value after {}", args[idx]))
}

fn parse_generate_args(args: &[String]) -> Result<GenerateArgs, String> {
    let mut ret = GenerateArgs::default();
    let mut prompt = vec![];
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--model" => {
                ret.model = Some(option_value(args, idx)?.to_string());
                idx += 2;
            }
            "--max-length" => {
                let raw = option_value(args, idx)?;
                let n = raw
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("Invalid --max-length '{raw}'"))?;
                ret.max_length = Some(n);
                idx += 2;
            }
            "--name" => {
                ret.name = Some(option_value(args, idx)?.to_string());
                idx += 2;
            }
            "--fasta" => {
                ret.fasta = Some(PathBuf::from(option_value(args, idx)?));
                idx += 2;
            }
            "--genbank" => {
                ret.genbank = Some(PathBuf::from(option_value(args, idx)?));
                idx += 2;
            }
            "--svg" => {
                ret.svg = Some(PathBuf::from(option_value(args, idx)?));
                idx += 2;
            }
            "--offline" => {
                ret.offline = true;
                idx += 1;
            }
            "--strict" => {
                ret.strict = true;
                idx += 1;
            }
            "--json" => {
                ret.json = true;
                idx += 1;
            }
            other if other.starts_with("--") => {
                return Err(format!("Unknown argument '{other}'. Use --help for usage."));
            }
            other => {
                prompt.push(other.to_string());
                idx += 1;
            }
        }
    }
    ret.prompt = prompt.join(" ");
    if ret.prompt.trim().is_empty() {
        return Err("generate requires a PROMPT".to_string());
    }
    Ok(ret)
}

fn export_outputs(args: &GenerateArgs, snapshot: &PipelineSnapshot) -> Result<(), String> {
    let (Some(generated), Some(annotations), Some(map)) = (
        snapshot.sequence.ready(),
        snapshot.annotations.ready(),
        snapshot.visualization.ready(),
    ) else {
        return Err("Final snapshot is incomplete".to_string());
    };
    let sequence =
        Sequence::parse(&generated.residues, Alphabet::Iupac).map_err(|e| e.to_string())?;
    let name = args.name.as_deref().unwrap_or("plasmid_gpt");
    if let Some(path) = &args.fasta {
        write_fasta(path, name, &sequence).map_err(|e| format!("{e:#}"))?;
        eprintln!("Wrote FASTA to '{}'", path.display());
    }
    if let Some(path) = &args.genbank {
        write_genbank(path, name, &sequence, &annotations.annotations)
            .map_err(|e| format!("{e:#}"))?;
        eprintln!("Wrote GenBank to '{}'", path.display());
    }
    if let Some(path) = &args.svg {
        write_svg(path, map).map_err(|e| format!("{e:#}"))?;
        eprintln!("Wrote map SVG to '{}'", path.display());
    }
    Ok(())
}

fn print_report(snapshot: &PipelineSnapshot) {
    if let Some(tokens) = snapshot.tokens.ready() {
        println!("**Conditioning:** `{}` (via {})\n", tokens.prefix, tokens.provider);
    }
    if let Some(metrics) = snapshot.metrics.ready() {
        println!("{}", metrics.summary);
    }
    if let Some(annotations) = snapshot.annotations.ready() {
        if let Some(note) = &annotations.note {
            println!("_{note}_\n");
        }
        println!("{}", annotation_table_markdown(&annotations.annotations));
    }
}

fn generate(settings: &Settings, args: &[String]) -> Result<(), String> {
    let args = parse_generate_args(args)?;
    let pipeline = Pipeline::from_settings(settings, args.offline).map_err(|e| e.to_string())?;
    let mut request = PipelineRequest::new(&args.prompt)
        .with_max_length(args.max_length.unwrap_or(DEFAULT_MAX_LENGTH));
    if let Some(model) = &args.model {
        request = request.with_model(model);
    }
    if args.strict {
        request.alphabet = Alphabet::Strict;
    }

    let handle = pipeline.spawn(request);
    for event in handle.events.iter() {
        match event {
            PipelineEvent::Snapshot(snapshot) => {
                eprintln!("[{}/{STAGE_COUNT}] {}", snapshot.version, snapshot.status)
            }
            PipelineEvent::Failed(failure) => {
                eprintln!("[failed] {}", failure.user_message)
            }
        }
    }
    let snapshot = handle
        .join()
        .map_err(|failure| format!("{} ({})", failure.user_message, failure.message))?;

    export_outputs(&args, &snapshot)?;
    if args.json {
        print_json(&snapshot)
    } else {
        print_report(&snapshot);
        Ok(())
    }
}

fn annotate(settings: &Settings, args: &[String]) -> Result<(), String> {
    let json = args.iter().any(|a| a == "--json");
    let Some(source) = args.iter().find(|a| !a.starts_with("--")) else {
        return Err("annotate requires a SEQUENCE or @FILE".to_string());
    };
    let (sequence, input) = match source.strip_prefix('@') {
        Some(path) => {
            let path = Path::new(path);
            let sequence = read_sequence_file(path).map_err(|e| e.to_string())?;
            (sequence, AnnotationInput::from_path(path))
        }
        None => {
            let sequence = Sequence::parse(source, Alphabet::Iupac).map_err(|e| e.to_string())?;
            let input = AnnotationInput::from_sequence(&sequence);
            (sequence, input)
        }
    };
    let annotations = Annotator::from_settings(settings).annotate_input(&input);
    let metrics = compute_metrics(&sequence, &annotations.annotations);
    if json {
        return print_json(&serde_json::json!({
            "metrics": metrics,
            "annotations": annotations,
        }));
    }
    println!("{}", metrics.summary);
    println!("{}", annotation_table_markdown(&annotations.annotations));
    Ok(())
}

fn vocabulary(settings: &Settings, args: &[String]) -> Result<(), String> {
    let vocabulary = settings.load_vocabulary().map_err(|e| e.to_string())?;
    if args.iter().any(|a| a == "--json") {
        let categories = vocabulary
            .categories()
            .map(|category| (category.key().to_string(), vocabulary.tokens(category).to_vec()))
            .collect::<std::collections::BTreeMap<_, _>>();
        return print_json(&categories);
    }
    println!("{}", vocabulary.prompt_catalog());
    Ok(())
}

fn providers(settings: &Settings) -> Result<(), String> {
    let catalog = settings
        .load_provider_catalog()
        .map_err(|e| e.to_string())?;
    for spec in &catalog.providers {
        let availability = provider_availability(spec);
        let status = match (&availability.reason, availability.available) {
            (_, true) => "available".to_string(),
            (Some(reason), false) => format!("unavailable: {reason}"),
            (None, false) => "unavailable".to_string(),
        };
        println!("{:<10} {:<26} {status}", spec.id, spec.transport.as_str());
    }
    Ok(())
}

fn models(settings: &Settings) -> Result<(), String> {
    let catalog = settings.load_model_catalog().map_err(|e| e.to_string())?;
    let default = settings.model_key(None, &catalog).to_string();
    for key in catalog.keys() {
        let spec = catalog.get(key).map_err(|e| e.to_string())?;
        let marker = if key == default { " (default)" } else { "" };
        println!("{key:<10} {}{marker}", spec.label);
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage();
        return Err("Missing command".to_string());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
        return Ok(());
    }

    let mut verbosity = 0u8;
    args.retain(|a| match a.as_str() {
        "-v" => {
            verbosity += 1;
            false
        }
        "-vv" => {
            verbosity += 2;
            false
        }
        _ => true,
    });
    let settings = Settings::from_env();
    set_up_logging(verbosity, settings.log_dir.as_deref())?;

    let Some((command, rest)) = args.split_first() else {
        usage();
        return Err("Missing command".to_string());
    };
    match command.as_str() {
        "generate" => generate(&settings, rest),
        "annotate" => annotate(&settings, rest),
        "vocabulary" => vocabulary(&settings, rest),
        "providers" => providers(&settings),
        "models" => models(&settings),
        other => {
            usage();
            Err(format!("Unknown command '{other}'"))
        }
    }
}
