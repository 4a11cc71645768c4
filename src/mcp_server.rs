//! MCP stdio server over the plasmid pipeline.
//!
//! Messages are JSON-RPC 2.0 bodies behind `Content-Length` headers. While
//! `generate_plasmid` runs, each snapshot is also sent as a
//! `notifications/progress` message when the caller supplied a progress
//! token.

use crate::{
    about,
    annotate::{AnnotationInput, read_sequence_file},
    config::DEFAULT_MAX_LENGTH,
    extract::{Alphabet, Sequence},
    metrics::compute_metrics,
    pipeline::{CancellationToken, Pipeline, PipelineEvent, PipelineRequest},
};
use log::{debug, warn};
use plasmid_protocol::{PipelineStage, STAGE_COUNT};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "plasmid_gpt_mcp";
const SERVER_TITLE: &str = "PlasmidGPT MCP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchOutcome {
    NoResponse,
    Response,
    Exit,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default, rename = "_meta")]
    meta: Value,
}

/// Logs why each token provider is unusable and fails when none is left.
/// Only `generate_plasmid` depends on providers.
pub fn check_startup_configuration(pipeline: &Pipeline) -> Result<(), String> {
    for (id, reason) in pipeline.providers().skipped() {
        warn!("Token provider '{id}' unavailable: {reason}");
    }
    pipeline
        .providers()
        .ensure_configured()
        .map_err(|e| e.to_string())
}

pub fn run_stdio_server(pipeline: &Pipeline) -> Result<(), String> {
    if let Err(e) = check_startup_configuration(pipeline) {
        warn!("{e}; generate_plasmid will fail until one is configured");
    }
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());
    run_server_loop(pipeline, &mut reader, &mut writer)
}

fn run_server_loop<R: BufRead, W: Write>(
    pipeline: &Pipeline,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), String> {
    loop {
        let Some(message) = read_framed_json(reader)? else {
            return Ok(());
        };
        match handle_message(pipeline, &message, writer)? {
            DispatchOutcome::NoResponse | DispatchOutcome::Response => {}
            DispatchOutcome::Exit => return Ok(()),
        }
    }
}

fn read_framed_json<R: BufRead>(reader: &mut R) -> Result<Option<Value>, String> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .map_err(|e| format!("Could not read MCP header line: {e}"))?;
        if bytes_read == 0 {
            return if content_length.is_some() {
                Err("Unexpected EOF while reading MCP headers".to_string())
            } else {
                Ok(None)
            };
        }
        let line_trimmed = line.trim_end_matches(['\r', '\n']);
        if line_trimmed.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some(value) = line_trimmed.strip_prefix("Content-Length:") {
            let len = value
                .trim()
                .parse::<usize>()
                .map_err(|e| format!("Invalid Content-Length header '{line_trimmed}': {e}"))?;
            content_length = Some(len);
        }
    }

    let len = content_length.ok_or_else(|| "Missing Content-Length header".to_string())?;
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|e| format!("Could not read MCP JSON payload body: {e}"))?;
    serde_json::from_slice::<Value>(&body)
        .map(Some)
        .map_err(|e| format!("Could not parse MCP JSON payload: {e}"))
}

fn write_framed_json<W: Write>(writer: &mut W, payload: &Value) -> Result<(), String> {
    let body = serde_json::to_vec(payload)
        .map_err(|e| format!("Could not serialize MCP message JSON: {e}"))?;
    writer
        .write_all(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes())
        .map_err(|e| format!("Could not write MCP message header: {e}"))?;
    writer
        .write_all(&body)
        .map_err(|e| format!("Could not write MCP message body: {e}"))?;
    writer
        .flush()
        .map_err(|e| format!("Could not flush MCP stream: {e}"))?;
    Ok(())
}

fn sequence_properties() -> Value {
    json!({
        "sequence": {
            "type": "string",
            "description": "Nucleotide sequence (IUPAC letters; whitespace ignored)."
        },
        "path": {
            "type": "string",
            "description": "FASTA or plain-text sequence file; used when sequence is absent."
        }
    })
}

fn tool_list() -> Value {
    json!([
        {
            "name": "capabilities",
            "title": "Capabilities",
            "description": "Return configured token providers, sequence models and the annotator.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        },
        {
            "name": "vocabulary",
            "title": "Conditioning Vocabulary",
            "description": "Return the conditioning tokens the pipeline can select, by category.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "format": {
                        "type": "string",
                        "enum": ["json", "text"]
                    }
                },
                "additionalProperties": false
            }
        },
        {
            "name": "generate_plasmid",
            "title": "Generate Plasmid",
            "description": "Run the five-stage pipeline for a natural-language request and return the final snapshot. Intermediate snapshots are sent as progress notifications.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "Natural-language description of the plasmid."
                    },
                    "model": {
                        "type": "string",
                        "description": "Model catalog key. Defaults to the server's default model."
                    },
                    "max_length": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum sequence length in nucleotides."
                    },
                    "alphabet": {
                        "type": "string",
                        "enum": ["strict", "iupac"]
                    }
                },
                "required": ["prompt"],
                "additionalProperties": false
            }
        },
        {
            "name": "annotate_sequence",
            "title": "Annotate Sequence",
            "description": "Annotate a nucleotide sequence; falls back to signature matching when no annotator is installed.",
            "inputSchema": {
                "type": "object",
                "properties": sequence_properties(),
                "additionalProperties": false
            }
        },
        {
            "name": "metrics",
            "title": "Sequence Metrics",
            "description": "Compute length, GC content, copy-number estimate and ORFs for a sequence.",
            "inputSchema": {
                "type": "object",
                "properties": sequence_properties(),
                "additionalProperties": false
            }
        }
    ])
}

fn jsonrpc_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn jsonrpc_error(id: Option<Value>, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message
    });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(Value::Null),
        "error": error
    })
}

fn tool_result_text(text: String, is_error: bool) -> Value {
    json!({
        "content": [
            {
                "type": "text",
                "text": text
            }
        ],
        "isError": is_error
    })
}

fn tool_result_json(value: Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    json!({
        "content": [
            {
                "type": "text",
                "text": text
            }
        ],
        "structuredContent": value,
        "isError": is_error
    })
}

fn capabilities(pipeline: &Pipeline) -> Value {
    let skipped = pipeline
        .providers()
        .skipped()
        .iter()
        .map(|(id, reason)| json!({ "id": id, "reason": reason }))
        .collect::<Vec<_>>();
    json!({
        "version": about::PLASMID_GPT_DISPLAY_VERSION,
        "providers": pipeline.providers().provider_ids(),
        "skipped_providers": skipped,
        "models": pipeline.models().keys().collect::<Vec<_>>(),
        "default_model": pipeline.default_model(),
        "annotator": pipeline.annotator().primary_id(),
        "stages": PipelineStage::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
    })
}

fn vocabulary_tool_result(pipeline: &Pipeline, args: &Map<String, Value>) -> Value {
    let vocabulary = pipeline.vocabulary();
    match args.get("format").and_then(Value::as_str).unwrap_or("json") {
        "text" => tool_result_text(vocabulary.prompt_catalog(), false),
        "json" => {
            let categories = vocabulary
                .categories()
                .map(|category| (category.key().to_string(), json!(vocabulary.tokens(category))))
                .collect::<Map<_, _>>();
            tool_result_json(
                json!({
                    "sequence_start": vocabulary.sequence_start(),
                    "categories": categories,
                }),
                false,
            )
        }
        other => tool_result_text(format!("Unsupported vocabulary format '{other}'"), true),
    }
}

fn pipeline_request(args: &Map<String, Value>) -> Result<PipelineRequest, String> {
    let prompt = args
        .get("prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| "generate_plasmid requires a non-empty 'prompt'".to_string())?;
    let max_length = match args.get("max_length") {
        None | Some(Value::Null) => DEFAULT_MAX_LENGTH,
        Some(value) => value
            .as_u64()
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .ok_or_else(|| "'max_length' must be a positive integer".to_string())?,
    };
    let alphabet = match args.get("alphabet") {
        None | Some(Value::Null) => Alphabet::default(),
        Some(value) => serde_json::from_value::<Alphabet>(value.clone())
            .map_err(|e| format!("Invalid 'alphabet': {e}"))?,
    };
    let mut request = PipelineRequest::new(prompt).with_max_length(max_length);
    request.alphabet = alphabet;
    if let Some(model) = args.get("model").and_then(Value::as_str) {
        request = request.with_model(model);
    }
    Ok(request)
}

fn progress_notification(token: &Value, event: &PipelineEvent) -> Option<Value> {
    let PipelineEvent::Snapshot(snapshot) = event else {
        return None;
    };
    Some(json!({
        "jsonrpc": "2.0",
        "method": "notifications/progress",
        "params": {
            "progressToken": token,
            "progress": snapshot.version,
            "total": STAGE_COUNT,
            "message": snapshot.status,
            "snapshot": snapshot,
        }
    }))
}

fn generate_tool_result<W: Write>(
    pipeline: &Pipeline,
    params: &ToolCallParams,
    writer: &mut W,
) -> Value {
    let args = params.arguments.as_object().cloned().unwrap_or_default();
    let request = match pipeline_request(&args) {
        Ok(request) => request,
        Err(message) => return tool_result_text(message, true),
    };
    let progress_token = params
        .meta
        .get("progressToken")
        .filter(|token| !token.is_null())
        .cloned();
    let outcome = pipeline.run(&request, &CancellationToken::default(), |event| {
        let Some(token) = &progress_token else {
            return true;
        };
        let Some(notification) = progress_notification(token, &event) else {
            return true;
        };
        match write_framed_json(writer, &notification) {
            Ok(()) => true,
            Err(e) => {
                warn!("Stopping generation, progress could not be sent: {e}");
                false
            }
        }
    });
    match outcome {
        Ok(snapshot) => tool_result_json(json!(snapshot), false),
        Err(failure) => tool_result_json(json!(failure), true),
    }
}

fn sequence_from_args(args: &Map<String, Value>) -> Result<(Sequence, AnnotationInput), String> {
    if let Some(text) = args.get("sequence").and_then(Value::as_str) {
        let sequence = Sequence::parse(text, Alphabet::Iupac).map_err(|e| e.to_string())?;
        let input = AnnotationInput::from_sequence(&sequence);
        return Ok((sequence, input));
    }
    if let Some(path) = args.get("path").and_then(Value::as_str) {
        let path = Path::new(path);
        let sequence = read_sequence_file(path).map_err(|e| e.to_string())?;
        let input = AnnotationInput::from_path(path);
        return Ok((sequence, input));
    }
    Err("Provide either 'sequence' or 'path'".to_string())
}

fn annotate_tool_result(pipeline: &Pipeline, args: &Map<String, Value>) -> Value {
    match sequence_from_args(args) {
        Ok((_, input)) => tool_result_json(json!(pipeline.annotator().annotate_input(&input)), false),
        Err(message) => tool_result_text(message, true),
    }
}

fn metrics_tool_result(pipeline: &Pipeline, args: &Map<String, Value>) -> Value {
    match sequence_from_args(args) {
        Ok((sequence, input)) => {
            let annotations = pipeline.annotator().annotate_input(&input);
            let metrics = compute_metrics(&sequence, &annotations.annotations);
            tool_result_json(
                json!({
                    "metrics": metrics,
                    "annotations": annotations,
                }),
                false,
            )
        }
        Err(message) => tool_result_text(message, true),
    }
}

fn tool_call_result<W: Write>(pipeline: &Pipeline, params: ToolCallParams, writer: &mut W) -> Value {
    let args = params.arguments.as_object().cloned().unwrap_or_default();
    debug!("MCP tool call '{}'", params.name);
    match params.name.trim() {
        "capabilities" => tool_result_json(capabilities(pipeline), false),
        "vocabulary" => vocabulary_tool_result(pipeline, &args),
        "generate_plasmid" => generate_tool_result(pipeline, &params, writer),
        "annotate_sequence" => annotate_tool_result(pipeline, &args),
        "metrics" => metrics_tool_result(pipeline, &args),
        other => tool_result_text(format!("Unknown MCP tool '{other}'"), true),
    }
}

fn write_response<W: Write>(writer: &mut W, value: Value) -> Result<DispatchOutcome, String> {
    write_framed_json(writer, &value)?;
    Ok(DispatchOutcome::Response)
}

fn handle_message<W: Write>(
    pipeline: &Pipeline,
    message: &Value,
    writer: &mut W,
) -> Result<DispatchOutcome, String> {
    let Some(obj) = message.as_object() else {
        return write_response(
            writer,
            jsonrpc_error(None, -32600, "Invalid Request: expected JSON object", None),
        );
    };
    let id = obj.get("id").cloned();
    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return write_response(
            writer,
            jsonrpc_error(
                id,
                -32600,
                "Invalid Request: missing method field",
                Some(message.clone()),
            ),
        );
    };

    match method {
        "initialize" => {
            let Some(id) = id else {
                return write_response(
                    writer,
                    jsonrpc_error(None, -32600, "Invalid Request: initialize requires id", None),
                );
            };
            let result = json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    }
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "title": SERVER_TITLE,
                    "version": about::PLASMID_GPT_DISPLAY_VERSION
                }
            });
            write_response(writer, jsonrpc_response(id, result))
        }
        "notifications/initialized" => Ok(DispatchOutcome::NoResponse),
        "ping" | "shutdown" => {
            if let Some(id) = id {
                write_response(writer, jsonrpc_response(id, json!({})))
            } else {
                Ok(DispatchOutcome::NoResponse)
            }
        }
        "tools/list" => {
            let Some(id) = id else {
                return Ok(DispatchOutcome::NoResponse);
            };
            write_response(writer, jsonrpc_response(id, json!({ "tools": tool_list() })))
        }
        "tools/call" => {
            let Some(id) = id else {
                return Ok(DispatchOutcome::NoResponse);
            };
            let params = obj.get("params").cloned().unwrap_or_else(|| json!({}));
            let call = match serde_json::from_value::<ToolCallParams>(params) {
                Ok(call) => call,
                Err(err) => {
                    return write_response(
                        writer,
                        jsonrpc_error(
                            Some(id),
                            -32602,
                            "Invalid params for tools/call",
                            Some(json!({ "details": err.to_string() })),
                        ),
                    );
                }
            };
            let result = tool_call_result(pipeline, call, writer);
            write_response(writer, jsonrpc_response(id, result))
        }
        "exit" => Ok(DispatchOutcome::Exit),
        _ => {
            if id.is_none() {
                return Ok(DispatchOutcome::NoResponse);
            }
            write_response(
                writer,
                jsonrpc_error(id, -32601, &format!("Method '{method}' not found"), None),
            )
        }
    }
}
