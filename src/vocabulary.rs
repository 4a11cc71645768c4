//! Closed vocabulary of conditioning tokens.
//!
//! The vocabulary is loaded once from a human-editable JSON document and is
//! immutable afterwards. Every token has the shape `<CATEGORY:VALUE>`, and the
//! category named inside the token must match the section it is listed under,
//! which keeps the categories a partition of the token space.

use crate::error::ConfigError;
use plasmid_protocol::{TokenCategory, TokenSelection};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const TOKEN_CONFIG_SCHEMA: &str = "plasmid_gpt.token_config.v1";
pub const DEFAULT_SEQUENCE_START: &str = "<SEQ>";
const BUILTIN_TOKEN_CONFIG: &str = include_str!("../assets/token_config.json");

#[derive(Debug, Deserialize)]
struct TokenConfigFile {
    schema: String,
    #[serde(default)]
    sequence_start: Option<String>,
    special_tokens: BTreeMap<String, Vec<String>>,
}

/// Wire dialects for schema-guided decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFlavor {
    /// Plain JSON schema, optional properties (Anthropic tool input).
    JsonSchema,
    /// OpenAI strict mode: every property required, `null` means no preference.
    OpenAiStrict,
    /// Gemini `responseSchema` (OpenAPI subset).
    Gemini,
}

/// Splits `<CATEGORY:VALUE>` into its category and value.
pub fn parse_condition_token(token: &str) -> Option<(TokenCategory, &str)> {
    let inner = token.strip_prefix('<')?.strip_suffix('>')?;
    let (category, value) = inner.split_once(':')?;
    let category = TokenCategory::ALL
        .into_iter()
        .find(|c| c.prefix() == category)?;
    let value_ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    value_ok.then_some((category, value))
}

fn is_marker_token(token: &str) -> bool {
    token
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .map(|inner| !inner.is_empty() && inner.chars().all(|c| c.is_ascii_uppercase()))
        .unwrap_or(false)
}

/// Conditioning tokens in canonical category order followed by the
/// sequence-start marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditioningPrefix {
    tokens: Vec<String>,
    text: String,
}

impl ConditioningPrefix {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// All prefix tokens, the sequence-start marker last.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn condition_tokens(&self) -> &[String] {
        &self.tokens[..self.tokens.len().saturating_sub(1)]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenVocabulary {
    categories: BTreeMap<TokenCategory, Vec<String>>,
    sequence_start: String,
}

impl TokenVocabulary {
    /// The vocabulary shipped in `assets/token_config.json`.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json_str(BUILTIN_TOKEN_CONFIG, "builtin token_config.json")
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text, &path.display().to_string())
    }

    pub fn from_json_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: TokenConfigFile =
            serde_json::from_str(text).map_err(|source| ConfigError::Json {
                path: origin.to_string(),
                source,
            })?;
        if file.schema != TOKEN_CONFIG_SCHEMA {
            return Err(ConfigError::Invalid(format!(
                "{origin}: unsupported token config schema '{}' (expected '{TOKEN_CONFIG_SCHEMA}')",
                file.schema
            )));
        }
        let sequence_start = file
            .sequence_start
            .unwrap_or_else(|| DEFAULT_SEQUENCE_START.to_string());
        if !is_marker_token(&sequence_start) {
            return Err(ConfigError::Invalid(format!(
                "{origin}: sequence start marker '{sequence_start}' must look like <NAME>"
            )));
        }

        let mut categories: BTreeMap<TokenCategory, Vec<String>> = BTreeMap::new();
        for (section, tokens) in file.special_tokens {
            let category = TokenCategory::parse(&section).ok_or_else(|| {
                ConfigError::Invalid(format!("{origin}: unknown token category '{section}'"))
            })?;
            let entry = categories.entry(category).or_default();
            for token in tokens {
                let token = token.trim().to_string();
                let (token_category, _) = parse_condition_token(&token).ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "{origin}: '{token}' is not a <CATEGORY:VALUE> token"
                    ))
                })?;
                if token_category != category {
                    return Err(ConfigError::Invalid(format!(
                        "{origin}: '{token}' is listed under '{section}' but belongs to '{}'",
                        token_category.prefix()
                    )));
                }
                if entry.contains(&token) {
                    return Err(ConfigError::Invalid(format!(
                        "{origin}: duplicate token '{token}' in '{section}'"
                    )));
                }
                entry.push(token);
            }
        }
        categories.retain(|_, tokens| !tokens.is_empty());
        if categories.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{origin}: token vocabulary is empty"
            )));
        }
        Ok(Self {
            categories,
            sequence_start,
        })
    }

    pub fn sequence_start(&self) -> &str {
        &self.sequence_start
    }

    /// Categories present in this vocabulary, in canonical order.
    pub fn categories(&self) -> impl Iterator<Item = TokenCategory> + '_ {
        self.categories.keys().copied()
    }

    pub fn tokens(&self, category: TokenCategory) -> &[String] {
        self.categories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, category: TokenCategory, token: &str) -> bool {
        self.tokens(category).iter().any(|t| t == token)
    }

    pub fn category_of(&self, token: &str) -> Option<TokenCategory> {
        let (category, _) = parse_condition_token(token)?;
        self.contains(category, token).then_some(category)
    }

    pub fn validate_selection(&self, selection: &TokenSelection) -> Result<(), String> {
        for (category, token) in selection.iter() {
            if !self.contains(category, token) {
                return Err(format!("'{token}' is not a valid {category} token"));
            }
        }
        Ok(())
    }

    /// Parses a provider response object into a selection. Unknown
    /// categories, non-string values and out-of-vocabulary tokens reject the
    /// whole response. `null` and empty strings mean "no preference".
    pub fn selection_from_json(&self, value: &Value) -> Result<TokenSelection, String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("expected a JSON object, got {value}"))?;
        let mut selection = TokenSelection::default();
        for (key, raw) in object {
            let category = TokenCategory::parse(key)
                .filter(|c| self.categories.contains_key(c))
                .ok_or_else(|| format!("unknown category '{key}'"))?;
            let token = match raw {
                Value::Null => continue,
                Value::String(s) if s.trim().is_empty() => continue,
                Value::String(s) => s.trim(),
                other => return Err(format!("category '{key}' has non-string value {other}")),
            };
            if !self.contains(category, token) {
                return Err(format!("'{token}' is not a valid {category} token"));
            }
            selection.set(category, Some(token.to_string()));
        }
        Ok(selection)
    }

    pub fn json_schema(&self, flavor: SchemaFlavor) -> Value {
        let mut properties = Map::new();
        for category in self.categories() {
            let tokens = self.tokens(category);
            let description = format!("{} preference, omit when not mentioned", category.key());
            let property = match flavor {
                SchemaFlavor::JsonSchema => json!({
                    "type": "string",
                    "enum": tokens,
                    "description": description,
                }),
                SchemaFlavor::OpenAiStrict => {
                    let mut choices = tokens.iter().map(|t| json!(t)).collect::<Vec<_>>();
                    choices.push(Value::Null);
                    json!({
                        "type": ["string", "null"],
                        "enum": choices,
                        "description": description,
                    })
                }
                SchemaFlavor::Gemini => json!({
                    "type": "STRING",
                    "format": "enum",
                    "enum": tokens,
                    "nullable": true,
                    "description": description,
                }),
            };
            properties.insert(category.key().to_string(), property);
        }
        match flavor {
            SchemaFlavor::JsonSchema => json!({
                "type": "object",
                "properties": properties,
                "additionalProperties": false,
            }),
            SchemaFlavor::OpenAiStrict => {
                let required = self.categories().map(|c| c.key()).collect::<Vec<_>>();
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false,
                })
            }
            SchemaFlavor::Gemini => json!({
                "type": "OBJECT",
                "properties": properties,
            }),
        }
    }

    /// One line per category, used in provider system prompts.
    pub fn prompt_catalog(&self) -> String {
        self.categories()
            .map(|c| format!("- {}: {}", c.key(), self.tokens(c).join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn conditioning_prefix(
        &self,
        selection: &TokenSelection,
    ) -> Result<ConditioningPrefix, String> {
        self.validate_selection(selection)?;
        let mut tokens = selection
            .iter()
            .map(|(_, token)| token.to_string())
            .collect::<Vec<_>>();
        tokens.push(self.sequence_start.clone());
        let text = tokens.concat();
        Ok(ConditioningPrefix { tokens, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vocab() -> TokenVocabulary {
        TokenVocabulary::builtin().expect("builtin vocabulary")
    }

    #[test]
    fn builtin_vocabulary_covers_all_nine_categories() {
        let v = vocab();
        assert_eq!(v.categories().count(), 9);
        assert!(v.contains(TokenCategory::Host, "<HOST:ECOLI>"));
        assert_eq!(v.category_of("<COPY:HIGH>"), Some(TokenCategory::Copy));
        assert_eq!(v.category_of("<COPY:ENORMOUS>"), None);
        assert_eq!(v.sequence_start(), "<SEQ>");
    }

    #[test]
    fn token_listed_under_wrong_category_is_rejected() {
        let text = r#"{"schema":"plasmid_gpt.token_config.v1",
            "special_tokens":{"HOST":["<HOST:ECOLI>","<COPY:HIGH>"]}}"#;
        let err = TokenVocabulary::from_json_str(text, "test").expect_err("partition violation");
        assert!(err.to_string().contains("belongs to 'COPY'"));
    }

    #[test]
    fn duplicate_and_malformed_tokens_are_rejected() {
        let dup = r#"{"schema":"plasmid_gpt.token_config.v1",
            "special_tokens":{"HOST":["<HOST:ECOLI>","<HOST:ECOLI>"]}}"#;
        assert!(TokenVocabulary::from_json_str(dup, "dup").is_err());
        let bad = r#"{"schema":"plasmid_gpt.token_config.v1",
            "special_tokens":{"HOST":["HOST:ECOLI"]}}"#;
        assert!(TokenVocabulary::from_json_str(bad, "bad").is_err());
        let schema = r#"{"schema":"other","special_tokens":{}}"#;
        assert!(TokenVocabulary::from_json_str(schema, "schema").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"schema":"plasmid_gpt.token_config.v1","special_tokens":{{"GC":["<GC:LOW>","<GC:HIGH>"]}}}}"#
        )
        .expect("write");
        let v = TokenVocabulary::from_json_file(file.path()).expect("load");
        assert_eq!(v.len(), 2);
        assert_eq!(v.tokens(TokenCategory::Host).len(), 0);
    }

    #[test]
    fn selection_parsing_rejects_hallucinated_tokens() {
        let v = vocab();
        let ok = v
            .selection_from_json(&json!({"host": "<HOST:ECOLI>", "copy": null, "gc": ""}))
            .expect("valid selection");
        assert_eq!(ok.host.as_deref(), Some("<HOST:ECOLI>"));
        assert_eq!(ok.len(), 1);

        assert!(v.selection_from_json(&json!({"host": "<HOST:MARS>"})).is_err());
        assert!(v.selection_from_json(&json!({"host": "<COPY:HIGH>"})).is_err());
        assert!(v.selection_from_json(&json!({"flavour": "<HOST:ECOLI>"})).is_err());
        assert!(v.selection_from_json(&json!({"host": 3})).is_err());
        assert!(v.selection_from_json(&json!(["<HOST:ECOLI>"])).is_err());
    }

    #[test]
    fn prefix_follows_category_order_and_ends_with_marker() {
        let v = vocab();
        let selection = v
            .selection_from_json(&json!({
                "resistance": "<RESISTANCE:AMP>",
                "application": "<APPLICATION:EXPRESSION>",
                "host": "<HOST:ECOLI>",
                "copy": "<COPY:HIGH>"
            }))
            .expect("selection");
        let prefix = v.conditioning_prefix(&selection).expect("prefix");
        assert_eq!(
            prefix.as_str(),
            "<HOST:ECOLI><RESISTANCE:AMP><COPY:HIGH><APPLICATION:EXPRESSION><SEQ>"
        );
        assert_eq!(prefix.condition_tokens().len(), 4);
    }

    #[test]
    fn strict_schema_requires_every_category_and_allows_null() {
        let schema = vocab().json_schema(SchemaFlavor::OpenAiStrict);
        assert_eq!(schema["required"].as_array().map(Vec::len), Some(9));
        let host_enum = schema["properties"]["host"]["enum"].as_array().expect("enum");
        assert!(host_enum.contains(&Value::Null));
        assert_eq!(schema["additionalProperties"], json!(false));
    }
}
