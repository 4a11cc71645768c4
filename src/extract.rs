//! Turns raw model output into a validated nucleotide sequence.

use crate::error::InvalidSequenceError;
use crate::iupac_code::IupacCode;
use crate::tokenizer::{BOS_TOKEN, EOS_TOKEN, PAD_TOKEN};
use crate::vocabulary::ConditioningPrefix;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alphabet {
    /// A, C, G and T only.
    Strict,
    /// A, C, G, T and the IUPAC ambiguity codes W S M K R Y B D H V N.
    #[default]
    Iupac,
}

impl Alphabet {
    pub fn accepts(self, residue: u8) -> bool {
        let code = IupacCode::from_letter(residue);
        match self {
            Self::Strict => code.is_unambiguous(),
            Self::Iupac => !code.is_empty(),
        }
    }
}

/// A non-empty, upper-case nucleotide string over an accepted alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sequence {
    residues: String,
}

impl Sequence {
    /// Validates `text` as a whole. Spaces and line breaks between residues
    /// are dropped; anything else outside the alphabet rejects the input.
    pub fn parse(text: &str, alphabet: Alphabet) -> Result<Self, InvalidSequenceError> {
        let trimmed = text.trim();
        let mut residues = String::with_capacity(trimmed.len());
        for (index, (offset, c)) in trimmed.char_indices().enumerate() {
            let position = index + 1;
            if matches!(c, ' ' | '\n' | '\r') {
                continue;
            }
            if c == '<' {
                let rest = &trimmed[offset..];
                let token = match rest.find('>') {
                    Some(end) => &rest[..=end],
                    None => rest,
                };
                return Err(InvalidSequenceError::UnexpectedToken {
                    token: token.to_string(),
                    position,
                });
            }
            if !c.is_ascii() || !alphabet.accepts(c as u8) {
                return Err(InvalidSequenceError::InvalidCharacter { found: c, position });
            }
            residues.push(c.to_ascii_uppercase());
        }
        if residues.is_empty() {
            return Err(InvalidSequenceError::Empty);
        }
        Ok(Self { residues })
    }

    pub fn as_str(&self) -> &str {
        &self.residues
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.residues.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    /// Always false; kept for the `len`/`is_empty` pair.
    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    pub fn into_string(self) -> String {
        self.residues
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.residues)
    }
}

/// Byte offset in `raw` where the continuation starts, after an optional
/// `<BOS>` and the conditioning prefix matched token by token. Whitespace
/// between tokens is tolerated, the tokens themselves must match exactly.
pub fn continuation_offset(raw: &str, prefix: &ConditioningPrefix) -> Option<usize> {
    let mut rest = raw.trim_start();
    if let Some(after) = rest.strip_prefix(BOS_TOKEN) {
        rest = after.trim_start();
    }
    for token in prefix.tokens() {
        rest = rest.strip_prefix(token.as_str())?.trim_start();
    }
    Some(raw.len() - rest.len())
}

fn strip_prefix<'a>(raw: &'a str, prefix: &ConditioningPrefix) -> Option<&'a str> {
    continuation_offset(raw, prefix).map(|offset| &raw[offset..])
}

fn strip_end_markers(body: &str) -> &str {
    let mut body = match body.find(EOS_TOKEN) {
        Some(cut) => &body[..cut],
        None => body,
    }
    .trim_end();
    while let Some(shorter) = body.strip_suffix(PAD_TOKEN) {
        body = shorter.trim_end();
    }
    body
}

/// Recovers the generated sequence from `raw`, which must begin with the
/// exact conditioning prefix that produced it.
pub fn extract(
    raw: &str,
    prefix: &ConditioningPrefix,
    alphabet: Alphabet,
) -> Result<Sequence, InvalidSequenceError> {
    let body = strip_prefix(raw, prefix).ok_or(InvalidSequenceError::PrefixMismatch)?;
    Sequence::parse(strip_end_markers(body), alphabet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::TokenVocabulary;
    use plasmid_protocol::TokenSelection;

    fn prefix() -> ConditioningPrefix {
        let vocabulary = TokenVocabulary::builtin().expect("vocabulary");
        let selection = TokenSelection {
            host: Some("<HOST:ECOLI>".to_string()),
            copy: Some("<COPY:HIGH>".to_string()),
            ..TokenSelection::default()
        };
        vocabulary.conditioning_prefix(&selection).expect("prefix")
    }

    #[test]
    fn strips_prefix_and_end_marker() {
        let p = prefix();
        let raw = format!("{}acgtNNacgt<EOS>GGGG", p.as_str());
        let seq = extract(&raw, &p, Alphabet::Iupac).expect("sequence");
        assert_eq!(seq.as_str(), "ACGTNNACGT");
        assert_eq!(seq.len(), 10);
    }

    #[test]
    fn tolerates_bos_and_spaced_tokens() {
        let p = prefix();
        let raw = format!("<BOS> {} A T G C\n<PAD><PAD>", p.tokens().join(" "));
        let seq = extract(&raw, &p, Alphabet::Strict).expect("sequence");
        assert_eq!(seq.as_str(), "ATGC");
    }

    #[test]
    fn prefix_must_match_exactly() {
        let p = prefix();
        let raw = "<HOST:YEAST><COPY:HIGH><SEQ>ACGT";
        assert_eq!(
            extract(raw, &p, Alphabet::Iupac),
            Err(InvalidSequenceError::PrefixMismatch)
        );
    }

    #[test]
    fn lone_unrecognized_symbol_is_rejected() {
        let p = prefix();
        let ambiguous = format!("{}N", p.as_str());
        assert_eq!(
            extract(&ambiguous, &p, Alphabet::Strict),
            Err(InvalidSequenceError::InvalidCharacter {
                found: 'N',
                position: 1
            })
        );
        let control = format!("{}\u{7}", p.as_str());
        assert!(matches!(
            extract(&control, &p, Alphabet::Iupac),
            Err(InvalidSequenceError::InvalidCharacter { found: '\u{7}', .. })
        ));
    }

    #[test]
    fn rejects_instead_of_truncating() {
        let p = prefix();
        let raw = format!("{}ACGTXACGT", p.as_str());
        assert_eq!(
            extract(&raw, &p, Alphabet::Iupac),
            Err(InvalidSequenceError::InvalidCharacter {
                found: 'X',
                position: 5
            })
        );
        let raw = format!("{}ACG<TAG:HIS>T", p.as_str());
        assert_eq!(
            extract(&raw, &p, Alphabet::Iupac),
            Err(InvalidSequenceError::UnexpectedToken {
                token: "<TAG:HIS>".to_string(),
                position: 4
            })
        );
    }

    #[test]
    fn empty_remainder_is_an_error() {
        let p = prefix();
        assert_eq!(
            extract(&format!("{} <EOS>", p.as_str()), &p, Alphabet::Iupac),
            Err(InvalidSequenceError::Empty)
        );
        assert_eq!(
            Sequence::parse("", Alphabet::Iupac),
            Err(InvalidSequenceError::Empty)
        );
    }
}
