//! Adapters that turn free text into a vocabulary-constrained token selection
//! through hosted language-model APIs.
//!
//! Each hosted transport asks its service for schema-constrained output
//! (forced tool input, response schema, strict JSON schema). The reply is
//! still parsed through [`TokenVocabulary::selection_from_json`], so a token
//! outside the vocabulary rejects the whole response.

use crate::error::{ConfigError, ProviderError, ProviderErrorCode};
use crate::provider_manager::TokenProvider;
use crate::vocabulary::{SchemaFlavor, TokenVocabulary};
use log::debug;
use plasmid_protocol::{TokenCategory, TokenSelection};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const PROVIDER_CATALOG_SCHEMA: &str = "plasmid_gpt.llm_providers.v1";
const BUILTIN_PROVIDER_CATALOG: &str = include_str!("../assets/llm_providers.json");
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;
const TOOL_NAME: &str = "select_plasmid_tokens";
const SCHEMA_NAME: &str = "plasmid_tokens";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTransport {
    AnthropicMessages,
    GeminiGenerateContent,
    #[default]
    OpenaiChatCompletions,
    OpenaiCompatible,
    BuiltinKeywords,
}

impl ProviderTransport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnthropicMessages => "anthropic_messages",
            Self::GeminiGenerateContent => "gemini_generate_content",
            Self::OpenaiChatCompletions => "openai_chat_completions",
            Self::OpenaiCompatible => "openai_compatible",
            Self::BuiltinKeywords => "builtin_keywords",
        }
    }

    fn needs_api_key(self) -> bool {
        matches!(
            self,
            Self::AnthropicMessages | Self::GeminiGenerateContent | Self::OpenaiChatCompletions
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSpec {
    pub id: String,
    pub label: String,
    pub transport: ProviderTransport,
    pub model: String,
    pub base_url: String,
    pub api_key_env: Option<String>,
    pub enabled: bool,
    pub timeout_secs: Option<u64>,
    /// Values consulted before the process environment.
    pub env: HashMap<String, String>,
}

impl Default for ProviderSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            label: String::new(),
            transport: ProviderTransport::default(),
            model: String::new(),
            base_url: String::new(),
            api_key_env: None,
            enabled: true,
            timeout_secs: None,
            env: HashMap::new(),
        }
    }
}

fn env_override_key(id: &str, suffix: &str) -> String {
    format!(
        "PLASMID_GPT_{}_{suffix}",
        id.to_ascii_uppercase().replace(['-', '.'], "_")
    )
}

fn env_value(spec: &ProviderSpec, key: &str) -> Option<String> {
    spec.env
        .get(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            std::env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
}

fn resolve_api_key(spec: &ProviderSpec) -> Option<String> {
    spec.api_key_env
        .as_deref()
        .and_then(|key| env_value(spec, key))
}

fn resolve_model(spec: &ProviderSpec) -> String {
    env_value(spec, &env_override_key(&spec.id, "MODEL"))
        .unwrap_or_else(|| spec.model.trim().to_string())
}

fn normalize_base_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    Some(with_scheme.trim_end_matches('/').to_string())
}

fn resolve_base_url(spec: &ProviderSpec) -> Option<String> {
    env_value(spec, &env_override_key(&spec.id, "BASE_URL"))
        .and_then(|value| normalize_base_url(&value))
        .or_else(|| normalize_base_url(&spec.base_url))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderAvailability {
    pub available: bool,
    pub reason: Option<String>,
}

impl ProviderAvailability {
    fn yes() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    fn no(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
        }
    }
}

pub fn provider_availability(spec: &ProviderSpec) -> ProviderAvailability {
    if !spec.enabled {
        return ProviderAvailability::no("disabled in provider catalog");
    }
    match spec.transport {
        ProviderTransport::BuiltinKeywords => ProviderAvailability::yes(),
        ProviderTransport::OpenaiCompatible => {
            if resolve_base_url(spec).is_none() {
                return ProviderAvailability::no(format!(
                    "no base URL configured (set {})",
                    env_override_key(&spec.id, "BASE_URL")
                ));
            }
            if resolve_model(spec).is_empty() {
                return ProviderAvailability::no(format!(
                    "no model configured (set {})",
                    env_override_key(&spec.id, "MODEL")
                ));
            }
            ProviderAvailability::yes()
        }
        transport if transport.needs_api_key() => match &spec.api_key_env {
            None => ProviderAvailability::no("catalog entry has no api_key_env"),
            Some(key) if resolve_api_key(spec).is_none() => {
                ProviderAvailability::no(format!("{key} is not set"))
            }
            Some(_) => ProviderAvailability::yes(),
        },
        _ => ProviderAvailability::yes(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderCatalog {
    pub schema: String,
    pub providers: Vec<ProviderSpec>,
}

impl ProviderCatalog {
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json_str(BUILTIN_PROVIDER_CATALOG, "builtin llm_providers.json")
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text, &path.display().to_string())
    }

    /// Parses and validates a catalog. Catalog order is the fallback order
    /// and is preserved.
    pub fn from_json_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let mut catalog =
            serde_json::from_str::<Self>(text).map_err(|source| ConfigError::Json {
                path: origin.to_string(),
                source,
            })?;
        if catalog.schema.trim().is_empty() {
            catalog.schema = PROVIDER_CATALOG_SCHEMA.to_string();
        }
        if catalog.schema != PROVIDER_CATALOG_SCHEMA {
            return Err(ConfigError::Invalid(format!(
                "{origin}: unsupported provider catalog schema '{}'",
                catalog.schema
            )));
        }
        let mut seen_ids = HashSet::new();
        for spec in &mut catalog.providers {
            spec.id = spec.id.trim().to_string();
            if spec.id.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{origin}: provider with empty 'id'"
                )));
            }
            if !seen_ids.insert(spec.id.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "{origin}: duplicate provider id '{}'",
                    spec.id
                )));
            }
            if spec.label.trim().is_empty() {
                spec.label = spec.id.clone();
            }
            if spec.transport.needs_api_key()
                && (spec.model.trim().is_empty() || spec.base_url.trim().is_empty())
            {
                return Err(ConfigError::Invalid(format!(
                    "{origin}: provider '{}' ({}) needs both 'model' and 'base_url'",
                    spec.id,
                    spec.transport.as_str()
                )));
            }
        }
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<&ProviderSpec> {
        self.providers.iter().find(|spec| spec.id == id.trim())
    }

    /// Turns on a catalog entry, e.g. the offline keyword matcher.
    pub fn enable(&mut self, id: &str) -> bool {
        match self.providers.iter_mut().find(|spec| spec.id == id.trim()) {
            Some(spec) => {
                spec.enabled = true;
                true
            }
            None => false,
        }
    }

    /// Credential variables of the hosted providers, for startup messages.
    pub fn credential_variables(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|spec| spec.enabled)
            .filter_map(|spec| spec.api_key_env.clone())
            .collect()
    }
}

pub fn build_provider(spec: &ProviderSpec) -> Result<Box<dyn TokenProvider>, ProviderError> {
    match spec.transport {
        ProviderTransport::BuiltinKeywords => Ok(Box::new(KeywordTokenProvider::new(&spec.id))),
        _ => Ok(Box::new(HttpTokenProvider::new(spec.clone())?)),
    }
}

pub fn system_prompt(vocabulary: &TokenVocabulary) -> String {
    format!(
        "You convert natural-language descriptions of plasmids into conditioning tokens.\n\
Pick at most one token per category, only from these lists, and leave out any \
category the description does not mention:\n{}\n\
Example output: {{\"host\": \"<HOST:ECOLI>\", \"copy\": \"<COPY:HIGH>\", \
\"application\": \"<APPLICATION:EXPRESSION>\", \"resistance\": \"<RESISTANCE:AMP>\"}}",
        vocabulary.prompt_catalog()
    )
}

pub fn anthropic_payload(model: &str, vocabulary: &TokenVocabulary, text: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": ANTHROPIC_MAX_TOKENS,
        "system": system_prompt(vocabulary),
        "messages": [
            { "role": "user", "content": text }
        ],
        "tools": [
            {
                "name": TOOL_NAME,
                "description": "Record the conditioning tokens that match the plasmid description.",
                "input_schema": vocabulary.json_schema(SchemaFlavor::JsonSchema)
            }
        ],
        "tool_choice": { "type": "tool", "name": TOOL_NAME }
    })
}

pub fn gemini_payload(vocabulary: &TokenVocabulary, text: &str) -> Value {
    json!({
        "systemInstruction": {
            "parts": [ { "text": system_prompt(vocabulary) } ]
        },
        "contents": [
            { "role": "user", "parts": [ { "text": text } ] }
        ],
        "generationConfig": {
            "temperature": 0,
            "responseMimeType": "application/json",
            "responseSchema": vocabulary.json_schema(SchemaFlavor::Gemini)
        }
    })
}

pub fn openai_payload(model: &str, vocabulary: &TokenVocabulary, text: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system_prompt(vocabulary) },
            { "role": "user", "content": text }
        ],
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": SCHEMA_NAME,
                "strict": true,
                "schema": vocabulary.json_schema(SchemaFlavor::OpenAiStrict)
            }
        }
    })
}

/// Parses a JSON object out of model text, tolerating markdown fences.
pub fn parse_json_object_text(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    let value = serde_json::from_str::<Value>(unfenced)
        .map_err(|e| format!("response is not valid JSON: {e}"))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(format!("expected a JSON object, got {value}"))
    }
}

pub fn extract_anthropic_selection(response: &Value) -> Option<Value> {
    let blocks = response.get("content")?.as_array()?;
    if let Some(input) = blocks
        .iter()
        .find(|block| {
            block.get("type").and_then(Value::as_str) == Some("tool_use")
                && block.get("name").and_then(Value::as_str) == Some(TOOL_NAME)
        })
        .and_then(|block| block.get("input"))
    {
        return Some(input.clone());
    }
    blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .find_map(|text| parse_json_object_text(text).ok())
}

pub fn extract_gemini_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

pub fn extract_openai_chat_completions_text(response: &Value) -> Option<String> {
    let message = response.get("choices")?.as_array()?.first()?.get("message")?;
    if let Some(content) = message.get("content").and_then(Value::as_str) {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    let collected = message
        .get("content")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!collected.is_empty()).then_some(collected)
}

fn extract_error_code(body: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    let error = value.get("error")?;
    error
        .get("code")
        .and_then(Value::as_str)
        .or_else(|| error.get("type").and_then(Value::as_str))
        .or_else(|| error.get("status").and_then(Value::as_str))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn classify_http_error(provider: &str, status: u16, body: &str) -> ProviderError {
    let message = format!("API error (status={status}): {}", body.trim());
    let error_code = extract_error_code(body).unwrap_or_default();
    let code = if status == 429 && error_code.eq_ignore_ascii_case("insufficient_quota") {
        ProviderErrorCode::Unavailable
    } else if status >= 500 || status == 429 {
        ProviderErrorCode::Transient
    } else if status == 401 || status == 403 {
        ProviderErrorCode::Unavailable
    } else {
        ProviderErrorCode::Http
    };
    ProviderError::new(provider, code, message)
}

/// Adapter for the hosted HTTP transports.
pub struct HttpTokenProvider {
    spec: ProviderSpec,
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpTokenProvider {
    pub fn new(spec: ProviderSpec) -> Result<Self, ProviderError> {
        let model = resolve_model(&spec);
        let base_url = resolve_base_url(&spec).ok_or_else(|| {
            ProviderError::new(&spec.id, ProviderErrorCode::Config, "no base URL configured")
        })?;
        let api_key = resolve_api_key(&spec);
        if spec.transport.needs_api_key() && api_key.is_none() {
            return Err(ProviderError::new(
                &spec.id,
                ProviderErrorCode::Unavailable,
                format!(
                    "{} is not set",
                    spec.api_key_env.as_deref().unwrap_or("API key variable")
                ),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(
                spec.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()
            .map_err(|e| {
                ProviderError::new(
                    &spec.id,
                    ProviderErrorCode::Config,
                    format!("could not build HTTP client: {e}"),
                )
            })?;
        Ok(Self {
            spec,
            model,
            base_url,
            api_key,
            client,
        })
    }

    fn err(&self, code: ProviderErrorCode, message: impl Into<String>) -> ProviderError {
        ProviderError::new(&self.spec.id, code, message)
    }

    fn post_json(
        &self,
        endpoint: &str,
        headers: &[(&str, &str)],
        bearer: Option<&str>,
        payload: &Value,
    ) -> Result<Value, ProviderError> {
        debug!("POST {endpoint} ({})", self.spec.id);
        let mut request = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.json(payload).send().map_err(|e| {
            let code = if e.is_timeout() || e.is_connect() {
                ProviderErrorCode::Transient
            } else {
                ProviderErrorCode::Http
            };
            self.err(code, format!("request failed: {e}"))
        })?;
        let status = response.status();
        let body = response.text().map_err(|e| {
            self.err(
                ProviderErrorCode::Http,
                format!("could not read response body: {e}"),
            )
        })?;
        if !status.is_success() {
            return Err(classify_http_error(&self.spec.id, status.as_u16(), &body));
        }
        serde_json::from_str::<Value>(&body).map_err(|e| {
            self.err(
                ProviderErrorCode::ResponseParse,
                format!("API returned invalid JSON: {e}"),
            )
        })
    }

    fn raw_selection(&self, text: &str, vocabulary: &TokenVocabulary) -> Result<Value, ProviderError> {
        let key = self.api_key.as_deref();
        match self.spec.transport {
            ProviderTransport::AnthropicMessages => {
                let payload = anthropic_payload(&self.model, vocabulary, text);
                let endpoint = format!("{}/messages", self.base_url);
                let headers = [
                    ("x-api-key", key.unwrap_or_default()),
                    ("anthropic-version", ANTHROPIC_VERSION),
                ];
                let response = self.post_json(&endpoint, &headers, None, &payload)?;
                extract_anthropic_selection(&response).ok_or_else(|| {
                    self.err(
                        ProviderErrorCode::ResponseParse,
                        "response contained no tool input",
                    )
                })
            }
            ProviderTransport::GeminiGenerateContent => {
                let payload = gemini_payload(vocabulary, text);
                let endpoint = format!("{}/models/{}:generateContent", self.base_url, self.model);
                let headers = [("x-goog-api-key", key.unwrap_or_default())];
                let response = self.post_json(&endpoint, &headers, None, &payload)?;
                let content = extract_gemini_text(&response).ok_or_else(|| {
                    self.err(ProviderErrorCode::ResponseParse, "response contained no text")
                })?;
                parse_json_object_text(&content)
                    .map_err(|e| self.err(ProviderErrorCode::ResponseParse, e))
            }
            ProviderTransport::OpenaiChatCompletions | ProviderTransport::OpenaiCompatible => {
                let payload = openai_payload(&self.model, vocabulary, text);
                let endpoint = format!("{}/chat/completions", self.base_url);
                let response = self.post_json(&endpoint, &[], key, &payload)?;
                let content = extract_openai_chat_completions_text(&response).ok_or_else(|| {
                    self.err(
                        ProviderErrorCode::ResponseParse,
                        "response contained no message content",
                    )
                })?;
                parse_json_object_text(&content)
                    .map_err(|e| self.err(ProviderErrorCode::ResponseParse, e))
            }
            ProviderTransport::BuiltinKeywords => Err(self.err(
                ProviderErrorCode::Config,
                "builtin_keywords is not an HTTP transport",
            )),
        }
    }
}

impl TokenProvider for HttpTokenProvider {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn convert(
        &self,
        text: &str,
        vocabulary: &TokenVocabulary,
    ) -> Result<TokenSelection, ProviderError> {
        let raw = self.raw_selection(text, vocabulary)?;
        vocabulary
            .selection_from_json(&raw)
            .map_err(|e| self.err(ProviderErrorCode::VocabularyViolation, e))
    }
}

/// Phrases that select a token, beyond the token's own value.
const KEYWORD_ALIASES: &[(&str, &[&str])] = &[
    ("<HOST:ECOLI>", &["e. coli", "e.coli", "ecoli", "escherichia", "bacterial"]),
    ("<HOST:MAMMALIAN>", &["mammalian", "human", "hek293", "cho cells", "mouse"]),
    ("<HOST:YEAST>", &["yeast", "saccharomyces", "pichia"]),
    ("<HOST:INSECT>", &["insect", "baculovirus", "sf9"]),
    ("<HOST:PLANT>", &["plant", "arabidopsis", "tobacco"]),
    ("<HOST:BACILLUS>", &["bacillus", "subtilis"]),
    ("<RESISTANCE:AMP>", &["ampicillin", "amp", "carbenicillin", "ampr"]),
    ("<RESISTANCE:KAN>", &["kanamycin", "kan", "kanr", "neomycin"]),
    ("<RESISTANCE:CHLOR>", &["chloramphenicol", "cm", "cmr"]),
    ("<RESISTANCE:TET>", &["tetracycline", "tet"]),
    ("<RESISTANCE:SPEC>", &["spectinomycin", "streptomycin"]),
    ("<RESISTANCE:GENT>", &["gentamicin"]),
    ("<RESISTANCE:ZEO>", &["zeocin", "bleomycin"]),
    ("<RESISTANCE:HYGRO>", &["hygromycin"]),
    ("<RESISTANCE:PURO>", &["puromycin"]),
    ("<RESISTANCE:BLAST>", &["blasticidin"]),
    ("<COPY:HIGH>", &["high copy", "high-copy", "multicopy"]),
    ("<COPY:MEDIUM>", &["medium copy", "medium-copy", "moderate copy"]),
    ("<COPY:LOW>", &["low copy", "low-copy", "single copy"]),
    ("<ORIGIN:PUC>", &["puc", "puc ori"]),
    ("<ORIGIN:COLE_ONE>", &["cole1", "cole1 ori"]),
    ("<ORIGIN:PBR>", &["pbr322", "pmb1"]),
    ("<ORIGIN:PA_FIFTEEN>", &["p15a"]),
    ("<ORIGIN:PSC>", &["psc101"]),
    ("<ORIGIN:F_ONE>", &["f1 ori", "f1 origin", "phagemid"]),
    ("<ORIGIN:SV_FORTY>", &["sv40"]),
    ("<PROMOTER:T_SEVEN>", &["t7", "t7 promoter"]),
    ("<PROMOTER:LAC>", &["lac", "lac promoter", "iptg"]),
    ("<PROMOTER:TAC>", &["tac", "tac promoter"]),
    ("<PROMOTER:ARA>", &["arabinose", "pbad", "arabad"]),
    ("<PROMOTER:CMV>", &["cmv"]),
    ("<PROMOTER:EF_ONE_A>", &["ef1a", "ef-1a", "ef1 alpha"]),
    ("<PROMOTER:CAG>", &["cag"]),
    ("<PROMOTER:U_SIX>", &["u6"]),
    ("<TAG:HIS>", &["his tag", "his-tag", "6xhis", "his6", "polyhistidine"]),
    ("<TAG:GST>", &["gst"]),
    ("<TAG:FLAG>", &["flag", "flag tag"]),
    ("<TAG:MBP>", &["mbp", "maltose binding"]),
    ("<TAG:GFP>", &["gfp", "fluorescent", "egfp"]),
    ("<TAG:MYC>", &["myc", "c-myc"]),
    ("<APPLICATION:EXPRESSION>", &["expression", "expressing", "overexpression"]),
    ("<APPLICATION:CLONING>", &["cloning", "subcloning"]),
    ("<APPLICATION:REPORTER>", &["reporter", "luciferase"]),
    ("<APPLICATION:CRISPR>", &["crispr", "cas9", "guide rna", "grna"]),
    ("<APPLICATION:LENTIVIRAL>", &["lentiviral", "lentivirus"]),
    ("<APPLICATION:SHUTTLE>", &["shuttle"]),
    ("<APPLICATION:RNAI>", &["rnai", "shrna", "sirna"]),
    ("<GC:LOW>", &["low gc", "at-rich", "at rich"]),
    ("<GC:MEDIUM>", &["medium gc", "balanced gc"]),
    ("<GC:HIGH>", &["high gc", "gc-rich", "gc rich"]),
    ("<SIZE:SMALL>", &["small", "compact", "minimal"]),
    ("<SIZE:MEDIUM>", &["medium size", "medium-sized"]),
    ("<SIZE:LARGE>", &["large", "big"]),
];

fn default_keyword(token: &str) -> Option<String> {
    let (_, value) = crate::vocabulary::parse_condition_token(token)?;
    Some(value.to_ascii_lowercase().replace('_', " "))
}

/// One case-insensitive pattern matching any of `phrases` as whole words.
fn keyword_pattern<S: AsRef<str>>(phrases: &[S]) -> Option<Regex> {
    let alternatives = phrases
        .iter()
        .map(|phrase| regex::escape(phrase.as_ref()))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&format!(r"(?:^|[^a-z0-9])(?:{alternatives})(?:$|[^a-z0-9])"))
        .case_insensitive(true)
        .build()
        .ok()
}

fn phrase_matches(text: &str, phrase: &str) -> bool {
    keyword_pattern(&[phrase]).is_some_and(|re| re.is_match(text))
}

/// Deterministic offline provider: picks, per category, the first token
/// whose keywords occur in the prompt.
pub struct KeywordTokenProvider {
    id: String,
    matchers: HashMap<&'static str, Regex>,
}

impl KeywordTokenProvider {
    pub fn new(id: &str) -> Self {
        let matchers = KEYWORD_ALIASES
            .iter()
            .filter_map(|(token, aliases)| {
                keyword_pattern(*aliases).map(|re| (*token, re))
            })
            .collect();
        Self {
            id: id.to_string(),
            matchers,
        }
    }

    fn matches(&self, token: &str, text: &str) -> bool {
        match self.matchers.get(token) {
            Some(re) => re.is_match(text),
            // Tokens outside the alias table match on their own value.
            None => default_keyword(token).is_some_and(|keyword| phrase_matches(text, &keyword)),
        }
    }
}

impl TokenProvider for KeywordTokenProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn convert(
        &self,
        text: &str,
        vocabulary: &TokenVocabulary,
    ) -> Result<TokenSelection, ProviderError> {
        let mut selection = TokenSelection::default();
        for category in TokenCategory::ALL {
            let chosen = vocabulary
                .tokens(category)
                .iter()
                .find(|token| self.matches(token, text));
            selection.set(category, chosen.cloned());
        }
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> TokenVocabulary {
        TokenVocabulary::builtin().expect("vocabulary")
    }

    fn spec(id: &str, transport: ProviderTransport) -> ProviderSpec {
        ProviderSpec {
            id: id.to_string(),
            transport,
            model: "m".to_string(),
            base_url: "https://example.invalid/v1".to_string(),
            api_key_env: Some("PLASMID_GPT_TEST_UNSET_KEY_VAR".to_string()),
            ..ProviderSpec::default()
        }
    }

    #[test]
    fn builtin_catalog_keeps_fallback_order() {
        let catalog = ProviderCatalog::builtin().expect("catalog");
        let ids = catalog
            .providers
            .iter()
            .map(|p| p.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(&ids[..3], &["anthropic", "gemini", "openai"]);
        assert!(!catalog.get("keywords").expect("keywords").enabled);
        assert_eq!(
            catalog.credential_variables()[..3],
            ["ANTHROPIC_API_KEY", "GOOGLE_API_KEY", "OPENAI_API_KEY"]
        );
    }

    #[test]
    fn catalog_rejects_duplicate_ids_and_missing_models() {
        let dup = r#"{"schema":"plasmid_gpt.llm_providers.v1","providers":[
            {"id":"a","transport":"builtin_keywords"},{"id":"a","transport":"builtin_keywords"}]}"#;
        assert!(ProviderCatalog::from_json_str(dup, "dup").is_err());
        let missing = r#"{"schema":"plasmid_gpt.llm_providers.v1","providers":[
            {"id":"openai","transport":"openai_chat_completions","api_key_env":"X"}]}"#;
        assert!(ProviderCatalog::from_json_str(missing, "missing").is_err());
    }

    #[test]
    fn availability_uses_spec_env_before_process_env() {
        let mut spec = spec("openai", ProviderTransport::OpenaiChatCompletions);
        assert!(!provider_availability(&spec).available);
        spec.env.insert(
            "PLASMID_GPT_TEST_UNSET_KEY_VAR".to_string(),
            "sk-test".to_string(),
        );
        assert!(provider_availability(&spec).available);
        spec.enabled = false;
        assert!(!provider_availability(&spec).available);
    }

    #[test]
    fn compatible_provider_needs_base_url_but_not_key() {
        let mut spec = spec("local", ProviderTransport::OpenaiCompatible);
        assert!(provider_availability(&spec).available);
        spec.base_url.clear();
        assert!(!provider_availability(&spec).available);
        spec.env.insert(
            "PLASMID_GPT_LOCAL_BASE_URL".to_string(),
            "localhost:8080/v1".to_string(),
        );
        assert!(provider_availability(&spec).available);
        assert_eq!(
            resolve_base_url(&spec).as_deref(),
            Some("http://localhost:8080/v1")
        );
    }

    #[test]
    fn payloads_carry_vocabulary_schema_without_history() {
        let v = vocab();
        let openai = openai_payload("gpt", &v, "a plasmid");
        assert_eq!(openai["response_format"]["json_schema"]["strict"], json!(true));
        assert_eq!(openai["messages"].as_array().map(Vec::len), Some(2));
        let anthropic = anthropic_payload("claude", &v, "a plasmid");
        assert_eq!(anthropic["tool_choice"]["name"], json!(TOOL_NAME));
        assert!(anthropic["tools"][0]["input_schema"]["properties"]["host"].is_object());
        let gemini = gemini_payload(&v, "a plasmid");
        assert_eq!(
            gemini["generationConfig"]["responseMimeType"],
            json!("application/json")
        );
    }

    #[test]
    fn extracts_anthropic_tool_input() {
        let response = json!({
            "content": [
                {"type": "text", "text": "Selecting tokens."},
                {"type": "tool_use", "name": TOOL_NAME, "input": {"host": "<HOST:ECOLI>"}}
            ]
        });
        assert_eq!(
            extract_anthropic_selection(&response),
            Some(json!({"host": "<HOST:ECOLI>"}))
        );
    }

    #[test]
    fn extracts_gemini_and_openai_text() {
        let gemini = json!({"candidates": [{"content": {"parts": [{"text": "{\"gc\":"}, {"text": "\"<GC:LOW>\"}"}]}}]});
        assert_eq!(
            extract_gemini_text(&gemini).as_deref(),
            Some("{\"gc\":\"<GC:LOW>\"}")
        );
        let openai = json!({"choices": [{"message": {"content": "  {\"copy\":\"<COPY:LOW>\"} "}}]});
        assert_eq!(
            extract_openai_chat_completions_text(&openai).as_deref(),
            Some("{\"copy\":\"<COPY:LOW>\"}")
        );
    }

    #[test]
    fn fenced_json_is_accepted_plain_text_is_not() {
        let value = parse_json_object_text("```json\n{\"host\": \"<HOST:YEAST>\"}\n```")
            .expect("fenced json");
        assert_eq!(value["host"], json!("<HOST:YEAST>"));
        assert!(parse_json_object_text("<HOST:YEAST> <COPY:LOW>").is_err());
    }

    #[test]
    fn classify_insufficient_quota_is_unavailable() {
        let body = r#"{"error":{"code":"insufficient_quota","message":"quota"}}"#;
        let err = classify_http_error("openai", 429, body);
        assert_eq!(err.code, ProviderErrorCode::Unavailable);
        assert_eq!(
            classify_http_error("openai", 503, "").code,
            ProviderErrorCode::Transient
        );
        assert_eq!(
            classify_http_error("openai", 401, "").code,
            ProviderErrorCode::Unavailable
        );
        assert_eq!(
            classify_http_error("openai", 400, "").code,
            ProviderErrorCode::Http
        );
    }

    #[test]
    fn http_provider_requires_key_for_hosted_transports() {
        let err = HttpTokenProvider::new(spec("anthropic", ProviderTransport::AnthropicMessages))
            .err()
            .expect("missing key");
        assert_eq!(err.code, ProviderErrorCode::Unavailable);
    }

    #[test]
    fn keyword_provider_handles_reference_prompt() {
        let provider = KeywordTokenProvider::new("keywords");
        let selection = provider
            .convert(
                "high copy expression plasmid for E. coli with ampicillin resistance",
                &vocab(),
            )
            .expect("selection");
        assert_eq!(selection.host.as_deref(), Some("<HOST:ECOLI>"));
        assert_eq!(selection.copy.as_deref(), Some("<COPY:HIGH>"));
        assert_eq!(
            selection.application.as_deref(),
            Some("<APPLICATION:EXPRESSION>")
        );
        assert_eq!(selection.resistance.as_deref(), Some("<RESISTANCE:AMP>"));
        assert_eq!(selection.len(), 4);
    }

    #[test]
    fn keyword_patterns_cover_builtin_vocabulary() {
        let provider = KeywordTokenProvider::new("keywords");
        let v = vocab();
        for category in TokenCategory::ALL {
            for token in v.tokens(category) {
                assert!(provider.matchers.contains_key(token.as_str()), "{token}");
            }
        }
        assert!(provider.matches("<TAG:HIS>", "with a 6xHis tag"));
        assert!(!provider.matches("<RESISTANCE:AMP>", "an example"));
        assert!(provider.matches("<HOST:NEWHOST>", "a newhost plasmid"));
    }

    #[test]
    fn keyword_matching_respects_word_boundaries() {
        assert!(phrase_matches("a T7 driven vector", "t7"));
        assert!(!phrase_matches("this plasmid", "his tag"));
        assert!(!phrase_matches("example", "amp"));
    }
}
