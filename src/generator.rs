//! Conditioned sequence generation and the process-wide model cache.

use crate::config::{ModelBackend, ModelCatalog, ModelSpec};
use crate::error::GenerationError;
use crate::extract::continuation_offset;
use crate::sampler::{Sampler, SamplingConfig};
use crate::tokenizer::PlasmidTokenizer;
use crate::vocabulary::ConditioningPrefix;
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const HOSTED_TIMEOUT_SECS: u64 = 300;

/// Raw model output: the conditioning prefix followed by the continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawGeneration {
    pub model: String,
    pub text: String,
}

pub trait SequenceModel: Send + Sync {
    fn key(&self) -> &str;

    /// Returns the prefix followed by at most `max_length` new symbols.
    fn generate(
        &self,
        prefix: &ConditioningPrefix,
        max_length: usize,
        config: &SamplingConfig,
    ) -> Result<String, GenerationError>;
}

/// Next-token scores over the tokenizer's id space.
pub trait LogitsModel: Send + Sync {
    fn logits(&self, context: &[u32]) -> Result<Vec<f32>, GenerationError>;
}

/// Text-generation inference endpoint. Every sampling parameter is
/// forwarded and `max_new_tokens` is the caller's length.
pub struct HostedTextGeneration {
    key: String,
    endpoint: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl HostedTextGeneration {
    pub fn new(spec: &ModelSpec) -> Result<Self, GenerationError> {
        let load_error = |message: String| GenerationError::ModelLoad {
            model: spec.key.clone(),
            message,
        };
        let endpoint = spec
            .endpoint
            .clone()
            .ok_or_else(|| load_error("no endpoint configured".to_string()))?;
        let token = spec
            .token_env
            .as_deref()
            .and_then(|key| std::env::var(key).ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if token.is_none() {
            if let Some(key) = &spec.token_env {
                warn!("{key} is not set; calling '{endpoint}' without authentication");
            }
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(HOSTED_TIMEOUT_SECS))
            .build()
            .map_err(|e| load_error(format!("could not build HTTP client: {e}")))?;
        Ok(Self {
            key: spec.key.clone(),
            endpoint,
            token,
            client,
        })
    }

    pub fn payload(prefix: &ConditioningPrefix, max_length: usize, config: &SamplingConfig) -> Value {
        let mut parameters = json!({
            "max_new_tokens": max_length,
            "temperature": config.temperature,
            "top_k": config.top_k,
            "top_p": config.top_p,
            "repetition_penalty": config.repetition_penalty,
            "no_repeat_ngram_size": config.no_repeat_ngram_size,
            "do_sample": config.do_sample,
            "return_full_text": true,
        });
        if let Some(seed) = config.seed {
            parameters["seed"] = json!(seed);
        }
        json!({
            "inputs": prefix.as_str(),
            "parameters": parameters,
            "options": { "wait_for_model": true, "use_cache": false },
        })
    }

    /// Some servers ignore `return_full_text`; an echoed prefix, with or
    /// without `<BOS>` and spacing, is kept as returned.
    pub fn with_prefix(text: String, prefix: &ConditioningPrefix) -> String {
        match continuation_offset(&text, prefix) {
            Some(_) => text,
            None => format!("{}{text}", prefix.as_str()),
        }
    }

    pub fn extract_generated_text(response: &Value) -> Option<String> {
        let item = match response {
            Value::Array(items) => items.first()?,
            other => other,
        };
        item.get("generated_text")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl SequenceModel for HostedTextGeneration {
    fn key(&self) -> &str {
        &self.key
    }

    fn generate(
        &self,
        prefix: &ConditioningPrefix,
        max_length: usize,
        config: &SamplingConfig,
    ) -> Result<String, GenerationError> {
        let payload = Self::payload(prefix, max_length, config);
        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        debug!("POST {} (max_new_tokens={max_length})", self.endpoint);
        let response = request
            .send()
            .map_err(|e| GenerationError::Backend(format!("request failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| GenerationError::Backend(format!("could not read response: {e}")))?;
        if !status.is_success() {
            return Err(GenerationError::Backend(format!(
                "endpoint returned {status}: {}",
                body.trim()
            )));
        }
        let value = serde_json::from_str::<Value>(&body)
            .map_err(|e| GenerationError::Backend(format!("invalid JSON from endpoint: {e}")))?;
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return Err(GenerationError::Backend(error.to_string()));
        }
        let text = Self::extract_generated_text(&value).ok_or(GenerationError::EmptyOutput)?;
        Ok(Self::with_prefix(text, prefix))
    }
}

/// Offline nucleotide model: independent draws whose GC share follows the
/// `<GC:*>` condition token, balanced when none is given.
pub struct CompositionModel {
    vocab_size: usize,
    nucleotides: [u32; 4],
    sequence_start: Option<u32>,
    gc_targets: Vec<(u32, f32)>,
}

impl CompositionModel {
    pub fn new(tokenizer: &PlasmidTokenizer, sequence_start: &str) -> Result<Self, GenerationError> {
        let id = |token: &str| {
            tokenizer.token_id(token).ok_or_else(|| GenerationError::ModelLoad {
                model: "builtin".to_string(),
                message: format!("tokenizer has no '{token}' token"),
            })
        };
        let nucleotides = [id("A")?, id("C")?, id("G")?, id("T")?];
        let gc_targets = [("<GC:LOW>", 0.35), ("<GC:MEDIUM>", 0.5), ("<GC:HIGH>", 0.62)]
            .into_iter()
            .filter_map(|(token, target)| tokenizer.token_id(token).map(|id| (id, target)))
            .collect();
        let vocab_size = tokenizer
            .condition_tokens()
            .iter()
            .filter_map(|t| tokenizer.token_id(t))
            .chain(nucleotides)
            .max()
            .map_or(0, |max| max as usize + 1)
            .max(tokenizer.len());
        Ok(Self {
            vocab_size,
            nucleotides,
            sequence_start: tokenizer.token_id(sequence_start),
            gc_targets,
        })
    }

    fn gc_target(&self, context: &[u32]) -> f32 {
        context
            .iter()
            .take_while(|id| Some(**id) != self.sequence_start)
            .find_map(|id| {
                self.gc_targets
                    .iter()
                    .find(|(gc_id, _)| gc_id == id)
                    .map(|(_, target)| *target)
            })
            .unwrap_or(0.5)
    }
}

impl LogitsModel for CompositionModel {
    fn logits(&self, context: &[u32]) -> Result<Vec<f32>, GenerationError> {
        let gc = self.gc_target(context);
        let mut logits = vec![f32::NEG_INFINITY; self.vocab_size];
        let [a, c, g, t] = self.nucleotides;
        for (id, p) in [(a, 1.0 - gc), (c, gc), (g, gc), (t, 1.0 - gc)] {
            logits[id as usize] = (p / 2.0).ln();
        }
        Ok(logits)
    }
}

/// Autoregressive decoding of a [`LogitsModel`] through the [`Sampler`].
pub struct LocalSamplerModel {
    key: String,
    tokenizer: PlasmidTokenizer,
    model: Box<dyn LogitsModel>,
}

impl LocalSamplerModel {
    pub fn new(key: &str, tokenizer: PlasmidTokenizer, model: Box<dyn LogitsModel>) -> Self {
        Self {
            key: key.to_string(),
            tokenizer,
            model,
        }
    }
}

impl SequenceModel for LocalSamplerModel {
    fn key(&self) -> &str {
        &self.key
    }

    fn generate(
        &self,
        prefix: &ConditioningPrefix,
        max_length: usize,
        config: &SamplingConfig,
    ) -> Result<String, GenerationError> {
        let mut sampler = Sampler::new(*config)?;
        sampler.extend(&self.tokenizer.encode(prefix.as_str(), true));
        let mut generated = Vec::with_capacity(max_length);
        while generated.len() < max_length {
            let logits = self.model.logits(sampler.history())?;
            match sampler.sample(logits) {
                Some(id) if id == self.tokenizer.eos_id() => break,
                Some(id) => generated.push(id),
                None => break,
            }
        }
        Ok(format!(
            "{}{}",
            prefix.as_str(),
            self.tokenizer.decode(&generated, true)
        ))
    }
}

/// Byte offset after the first `max_length` residues, skipping over any
/// bracketed tokens.
fn clip_offset(continuation: &str, max_length: usize) -> usize {
    let mut count = 0;
    let mut in_token = false;
    for (offset, c) in continuation.char_indices() {
        match c {
            '<' => in_token = true,
            '>' if in_token => in_token = false,
            c if !in_token && c.is_ascii_alphabetic() => {
                if count == max_length {
                    return offset;
                }
                count += 1;
            }
            _ => {}
        }
    }
    continuation.len()
}

type ModelLoader = dyn Fn(&str) -> Result<Arc<dyn SequenceModel>, GenerationError> + Send + Sync;
type ModelSlot = Arc<Mutex<Option<Arc<dyn SequenceModel>>>>;

/// Load-once cache of sequence models, shared read-only between requests.
/// Concurrent requests for the same key wait for a single load; a failed
/// load is not remembered.
pub struct ModelRegistry {
    loader: Box<ModelLoader>,
    slots: Mutex<HashMap<String, ModelSlot>>,
}

impl ModelRegistry {
    pub fn new(
        loader: impl Fn(&str) -> Result<Arc<dyn SequenceModel>, GenerationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            loader: Box::new(loader),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_catalog(catalog: ModelCatalog) -> Self {
        Self::new(move |key| load_model(&catalog, key))
    }

    pub fn get_or_load(&self, key: &str) -> Result<Arc<dyn SequenceModel>, GenerationError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.to_string()).or_default().clone()
        };
        let mut model = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(loaded) = model.as_ref() {
            return Ok(loaded.clone());
        }
        info!("Loading sequence model '{key}'");
        let loaded = (self.loader)(key)?;
        *model = Some(loaded.clone());
        Ok(loaded)
    }

    pub fn loaded_keys(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys = slots
            .iter()
            .filter(|(_, slot)| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }
}

fn load_model(catalog: &ModelCatalog, key: &str) -> Result<Arc<dyn SequenceModel>, GenerationError> {
    let spec = catalog.get(key)?;
    match spec.backend {
        ModelBackend::HostedTextGeneration => Ok(Arc::new(HostedTextGeneration::new(spec)?)),
        ModelBackend::BuiltinComposition => {
            let tokenizer = match (&spec.tokenizer_vocab, catalog.is_builtin()) {
                (Some(path), false) => PlasmidTokenizer::from_json_file(&catalog.resolve_path(path)),
                _ => PlasmidTokenizer::builtin(),
            }
            .map_err(|e| GenerationError::ModelLoad {
                model: key.to_string(),
                message: e.to_string(),
            })?;
            let model = CompositionModel::new(&tokenizer, crate::vocabulary::DEFAULT_SEQUENCE_START)?;
            Ok(Arc::new(LocalSamplerModel::new(key, tokenizer, Box::new(model))))
        }
    }
}

/// One model variant with its sampling parameters.
pub struct SequenceGenerator {
    registry: Arc<ModelRegistry>,
    model_key: String,
    config: SamplingConfig,
    advisory_max_length: Option<usize>,
}

impl SequenceGenerator {
    pub fn new(registry: Arc<ModelRegistry>, model_key: &str, config: SamplingConfig) -> Self {
        Self {
            registry,
            model_key: model_key.to_string(),
            config,
            advisory_max_length: None,
        }
    }

    pub fn for_catalog(registry: Arc<ModelRegistry>, catalog: &ModelCatalog, model_key: &str) -> Result<Self, GenerationError> {
        let spec = catalog.get(model_key)?;
        Ok(Self {
            registry,
            model_key: spec.key.clone(),
            config: spec.sampling,
            advisory_max_length: spec.advisory_max_length,
        })
    }

    pub fn model_key(&self) -> &str {
        &self.model_key
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// The continuation is clipped to `max_length` residues; no other cap
    /// applies.
    pub fn generate(
        &self,
        prefix: &ConditioningPrefix,
        max_length: usize,
    ) -> Result<RawGeneration, GenerationError> {
        if max_length == 0 {
            return Err(GenerationError::InvalidConfig(
                "max_length must be at least 1".to_string(),
            ));
        }
        self.config.validate()?;
        if let Some(advisory) = self.advisory_max_length.filter(|a| max_length > *a) {
            info!(
                "Requested length {max_length} exceeds the advisory {advisory} of '{}'",
                self.model_key
            );
        }
        let model = self.registry.get_or_load(&self.model_key)?;
        let mut text = model.generate(prefix, max_length, &self.config)?;
        if let Some(offset) = continuation_offset(&text, prefix) {
            let cut = offset + clip_offset(&text[offset..], max_length);
            text.truncate(cut);
            if text[offset..].trim().is_empty() {
                return Err(GenerationError::EmptyOutput);
            }
        } else if text.trim().is_empty() {
            return Err(GenerationError::EmptyOutput);
        }
        debug!("'{}' returned {} bytes", self.model_key, text.len());
        Ok(RawGeneration {
            model: self.model_key.clone(),
            text,
        })
    }
}
