//! A small library of well-known plasmid elements, used to annotate a
//! sequence when no external annotator is available.

use crate::iupac_code::IupacCode;
use plasmid_protocol::{Annotation, FeatureType, Strand};
use rayon::prelude::*;

pub struct Signature {
    pub name: &'static str,
    pub feature_type: FeatureType,
    pub motif: &'static str,
}

impl Signature {
    const fn new(name: &'static str, feature_type: FeatureType, motif: &'static str) -> Self {
        Self {
            name,
            feature_type,
            motif,
        }
    }
}

pub const SIGNATURES: &[Signature] = &[
    Signature::new("T7 promoter", FeatureType::Promoter, "TAATACGACTCACTATAGGG"),
    Signature::new("T3 promoter", FeatureType::Promoter, "AATTAACCCTCACTAAAGGG"),
    Signature::new("lac promoter", FeatureType::Promoter, "TGGAATTGTGAGCGGATAACAATT"),
    Signature::new("tac promoter", FeatureType::Promoter, "TTTACACTTTATGCTTCCGGCTC"),
    Signature::new(
        "T7 terminator",
        FeatureType::Terminator,
        "CTAGCATAACCCCTTGGGGCCTCTAAACGGGTCTTGAGGGGTTTTTTG",
    ),
    Signature::new(
        "rrnB T1 terminator",
        FeatureType::Terminator,
        "TCTCGTGGGCTCGTGTTGTGTGTATTTTTTTTGTTTAG",
    ),
    // Diagnostic 5' fragments of the coding sequences.
    Signature::new("AmpR", FeatureType::Marker, "ATGAGTATTCAACATTTCCGTGTCGCCCTTATTCCC"),
    Signature::new("KanR", FeatureType::Marker, "ATGAGCCATATTCAACGGGAAACGTCTTGCTC"),
    Signature::new("CmR", FeatureType::Marker, "ATGGAGAAAAAAATCACTGGATATACCACCGTTG"),
    Signature::new(
        "pUC ori",
        FeatureType::RepOrigin,
        "TTGAGATCCTTTTTTTCTGCGCGTAATCTGCTGCTTGCAAACAAAAAAACCACCGCTACCAGCGGTGG",
    ),
    Signature::new(
        "p15A ori",
        FeatureType::RepOrigin,
        "TTGAGATCGTTTTGGTCTGCGCGTAATCTCTTGCTCTGAAAACGAAAAAACCGCCTTGCAGGGCGG",
    ),
    Signature::new(
        "f1 ori",
        FeatureType::RepOrigin,
        "ACGCGCCCTGTAGCGGCGCATTAAGCGCGGCGGGTGTGGTGGTTACGCGCAGCGTGACCGCTACACTTGCCAGCGCCC",
    ),
    Signature::new(
        "SV40 ori",
        FeatureType::RepOrigin,
        "GGTGTGGAAAGTCCCCAGGCTCCCCAGCAGGCAGAAGTATGCAAAGCATGCATCTCAATTAGTCAGCAACCA",
    ),
    Signature::new("RBS", FeatureType::Other, "AGGAGG"),
];

fn hits(sequence: &[u8], motif: &[u8]) -> Vec<usize> {
    if motif.is_empty() || motif.len() > sequence.len() {
        return vec![];
    }
    (0..=sequence.len() - motif.len())
        .filter(|&pos| IupacCode::matches_at(sequence, motif, pos))
        .collect()
}

/// Every occurrence of every library motif on both strands, in position
/// order. Coordinates are 1-based inclusive on the forward strand.
pub fn scan(sequence: &[u8]) -> Vec<Annotation> {
    let mut ret = SIGNATURES
        .par_iter()
        .flat_map_iter(|signature| {
            let forward = signature.motif.as_bytes();
            let reverse = IupacCode::reverse_complement(forward);
            let palindromic = reverse == forward;
            let len = forward.len();
            let mut found = hits(sequence, forward)
                .into_iter()
                .map(|pos| {
                    Annotation::new(
                        signature.name,
                        signature.feature_type,
                        pos + 1,
                        pos + len,
                        Strand::Forward,
                    )
                })
                .collect::<Vec<_>>();
            if !palindromic {
                found.extend(hits(sequence, &reverse).into_iter().map(|pos| {
                    Annotation::new(
                        signature.name,
                        signature.feature_type,
                        pos + 1,
                        pos + len,
                        Strand::Reverse,
                    )
                }));
            }
            found
        })
        .collect::<Vec<_>>();
    ret.sort_by(|a, b| (a.start, a.end, &a.name).cmp(&(b.start, b.end, &b.name)));
    ret
}

pub fn find(name: &str) -> Option<&'static Signature> {
    SIGNATURES.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(insert: &str) -> Vec<u8> {
        let mut seq = "C".repeat(40);
        seq += insert;
        seq += &"C".repeat(40);
        seq.into_bytes()
    }

    #[test]
    fn planted_promoter_is_found_forward() {
        let seq = padded(find("T7 promoter").expect("T7").motif);
        let found = scan(&seq);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].feature_type, FeatureType::Promoter);
        assert_eq!((found[0].start, found[0].end), (41, 60));
        assert_eq!(found[0].strand, Strand::Forward);
    }

    #[test]
    fn reverse_complement_hit_reports_reverse_strand() {
        let motif = find("AmpR").expect("AmpR").motif.as_bytes();
        let rc = String::from_utf8(IupacCode::reverse_complement(motif)).expect("ascii");
        let found = scan(&padded(&rc));
        let amp = found.iter().find(|a| a.name == "AmpR").expect("AmpR hit");
        assert_eq!(amp.strand, Strand::Reverse);
        assert_eq!(amp.start, 41);
        assert_eq!(amp.len(), motif.len());
    }

    #[test]
    fn lower_case_input_matches() {
        let seq = padded(&find("p15A ori").expect("p15A").motif.to_ascii_lowercase());
        assert!(scan(&seq).iter().any(|a| a.feature_type == FeatureType::RepOrigin));
    }

    #[test]
    fn background_sequence_has_no_hits() {
        assert!(scan(&padded("")).is_empty());
        assert!(scan(b"").is_empty());
    }
}
