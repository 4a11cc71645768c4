//! Character-level tokenizer of the sequence model: control tokens,
//! bracketed condition tokens and one token per nucleotide.

use crate::error::ConfigError;
use crate::vocabulary::{TokenVocabulary, parse_condition_token};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const BOS_TOKEN: &str = "<BOS>";
pub const PAD_TOKEN: &str = "<PAD>";
pub const EOS_TOKEN: &str = "<EOS>";
pub const UNK_TOKEN: &str = "<UNK>";
const BUILTIN_VOCAB: &str = include_str!("../assets/plasmid_vocab.json");

#[derive(Debug, Clone)]
pub struct PlasmidTokenizer {
    vocab: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
    bos_id: u32,
    pad_id: u32,
    eos_id: u32,
    unk_id: u32,
    special_token_pattern: Regex,
}

impl PlasmidTokenizer {
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json_str(BUILTIN_VOCAB, "builtin plasmid_vocab.json")
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text, &path.display().to_string())
    }

    /// Loads a `token -> id` map. The four control tokens are required and
    /// ids must be unique.
    pub fn from_json_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let vocab = serde_json::from_str::<HashMap<String, u32>>(text).map_err(|source| {
            ConfigError::Json {
                path: origin.to_string(),
                source,
            }
        })?;
        let mut id_to_token = HashMap::with_capacity(vocab.len());
        for (token, id) in &vocab {
            if let Some(previous) = id_to_token.insert(*id, token.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "{origin}: id {id} is used by both '{previous}' and '{token}'"
                )));
            }
        }
        let required = |token: &str| {
            vocab.get(token).copied().ok_or_else(|| {
                ConfigError::Invalid(format!("{origin}: control token '{token}' is missing"))
            })
        };
        let special_token_pattern = Regex::new(r"<[A-Z_]+:[A-Z0-9_]+>|<[A-Z]+>")
            .map_err(|e| ConfigError::Invalid(format!("token pattern: {e}")))?;
        Ok(Self {
            bos_id: required(BOS_TOKEN)?,
            pad_id: required(PAD_TOKEN)?,
            eos_id: required(EOS_TOKEN)?,
            unk_id: required(UNK_TOKEN)?,
            vocab,
            id_to_token,
            special_token_pattern,
        })
    }

    pub fn len(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }

    pub fn bos_id(&self) -> u32 {
        self.bos_id
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn eos_id(&self) -> u32 {
        self.eos_id
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.vocab.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    fn push_chars(&self, text: &str, ids: &mut Vec<u32>) {
        let mut buf = [0u8; 4];
        for c in text.chars() {
            ids.push(self.token_id(c.encode_utf8(&mut buf)).unwrap_or(self.unk_id));
        }
    }

    /// Bracketed tokens map to one id each, every other character to its
    /// own id; anything unknown becomes `<UNK>`.
    pub fn encode(&self, text: &str, add_bos: bool) -> Vec<u32> {
        let mut ids = Vec::with_capacity(text.len() + 1);
        if add_bos {
            ids.push(self.bos_id);
        }
        let mut pos = 0;
        for found in self.special_token_pattern.find_iter(text) {
            self.push_chars(&text[pos..found.start()], &mut ids);
            ids.push(self.token_id(found.as_str()).unwrap_or(self.unk_id));
            pos = found.end();
        }
        self.push_chars(&text[pos..], &mut ids);
        ids
    }

    /// With `skip_special`, control tokens are dropped; condition tokens and
    /// the sequence-start marker are kept.
    pub fn decode(&self, ids: &[u32], skip_special: bool) -> String {
        ids.iter()
            .filter(|&&id| {
                !(skip_special
                    && [self.bos_id, self.eos_id, self.pad_id, self.unk_id].contains(&id))
            })
            .map(|id| self.token(*id).unwrap_or(UNK_TOKEN))
            .collect()
    }

    pub fn condition_tokens(&self) -> Vec<&str> {
        let mut tokens = self
            .vocab
            .iter()
            .filter(|(token, _)| parse_condition_token(token).is_some())
            .map(|(token, id)| (*id, token.as_str()))
            .collect::<Vec<_>>();
        tokens.sort_unstable();
        tokens.into_iter().map(|(_, token)| token).collect()
    }

    /// Ids of the single-letter nucleotide tokens, sorted by id.
    pub fn nucleotide_ids(&self) -> Vec<u32> {
        let mut ids = ["A", "C", "G", "T"]
            .iter()
            .filter_map(|n| self.token_id(n))
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Vocabulary tokens this tokenizer would encode as `<UNK>`.
    pub fn unknown_condition_tokens(&self, vocabulary: &TokenVocabulary) -> Vec<String> {
        let mut unknown = vocabulary
            .categories()
            .flat_map(|c| vocabulary.tokens(c).iter().cloned())
            .filter(|token| self.token_id(token).is_none())
            .collect::<Vec<_>>();
        if self.token_id(vocabulary.sequence_start()).is_none() {
            unknown.push(vocabulary.sequence_start().to_string());
        }
        unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> PlasmidTokenizer {
        PlasmidTokenizer::builtin().expect("tokenizer")
    }

    #[test]
    fn control_tokens_have_fixed_ids() {
        let t = tokenizer();
        assert_eq!(
            (t.bos_id(), t.pad_id(), t.eos_id(), t.unk_id()),
            (0, 1, 2, 3)
        );
        assert_eq!(t.token_id("<SEQ>"), Some(4));
        assert_eq!(t.nucleotide_ids(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn encode_splits_bracketed_tokens_and_characters() {
        let t = tokenizer();
        let ids = t.encode("<HOST:ECOLI><SEQ>ACGX", true);
        assert_eq!(ids[0], t.bos_id());
        assert_eq!(ids[1], t.token_id("<HOST:ECOLI>").expect("host"));
        assert_eq!(&ids[2..], &[4, 5, 6, 7, t.unk_id()]);
    }

    #[test]
    fn decode_can_skip_control_tokens() {
        let t = tokenizer();
        let ids = t.encode("<SEQ>ACGT<EOS><PAD>", true);
        assert_eq!(t.decode(&ids, true), "<SEQ>ACGT");
        assert_eq!(t.decode(&ids, false), "<BOS><SEQ>ACGT<EOS><PAD>");
    }

    #[test]
    fn builtin_tokenizer_knows_every_vocabulary_token() {
        let t = tokenizer();
        let vocabulary = TokenVocabulary::builtin().expect("vocabulary");
        assert!(t.unknown_condition_tokens(&vocabulary).is_empty());
        assert_eq!(t.condition_tokens().len(), vocabulary.len());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let text = r#"{"<BOS>":0,"<PAD>":1,"<EOS>":2,"<UNK>":3,"A":3}"#;
        assert!(PlasmidTokenizer::from_json_str(text, "dup").is_err());
        let missing = r#"{"<BOS>":0,"<PAD>":1,"<EOS>":2}"#;
        assert!(PlasmidTokenizer::from_json_str(missing, "missing").is_err());
    }
}
