//! Summary metrics of a generated plasmid.

use crate::extract::Sequence;
use crate::gc_contents::{GcContents, gc_category, gc_count, gc_fraction};
use crate::open_reading_frame::{MIN_ORF_LENGTH, ReadingFrames, first_orfs};
use plasmid_protocol::{
    Annotation, CopyNumberBasis, CopyNumberCategory, CopyNumberEstimate, FeatureType, GcWindow,
    Metrics,
};

const HIGH_COPY_ORIGINS: &[&str] = &["pUC", "ColE1", "pMB1"];
const MEDIUM_COPY_ORIGINS: &[&str] = &["p15A", "pSC101"];
const LOW_COPY_ORIGINS: &[&str] = &["pBR322", "F", "P1"];

/// Word-wise, case-insensitive. Names of three or more characters also
/// match as a word prefix ("pUC19"); shorter ones must match a whole word,
/// so "f1 ori" is not an F origin.
fn names_origin(feature_name: &str, origin: &str) -> bool {
    feature_name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .any(|word| {
            word.eq_ignore_ascii_case(origin)
                || (origin.len() >= 3
                    && word.len() > origin.len()
                    && word[..origin.len()].eq_ignore_ascii_case(origin))
        })
}

fn origin_class(feature_name: &str) -> Option<CopyNumberCategory> {
    [
        (HIGH_COPY_ORIGINS, CopyNumberCategory::High),
        (MEDIUM_COPY_ORIGINS, CopyNumberCategory::Medium),
        (LOW_COPY_ORIGINS, CopyNumberCategory::Low),
    ]
    .into_iter()
    .find(|(names, _)| names.iter().any(|origin| names_origin(feature_name, origin)))
    .map(|(_, category)| category)
}

fn is_origin(annotation: &Annotation) -> bool {
    annotation.feature_type == FeatureType::RepOrigin
        || annotation.name.to_ascii_lowercase().contains("origin")
}

/// The first origin with a known copy-number class decides; otherwise the
/// sequence length does.
pub fn estimate_copy_number(length: usize, annotations: &[Annotation]) -> CopyNumberEstimate {
    let by_origin = annotations
        .iter()
        .filter(|a| is_origin(a))
        .find_map(|a| origin_class(&a.name).map(|category| (a, category)));
    if let Some((origin, category)) = by_origin {
        return CopyNumberEstimate {
            category,
            basis: CopyNumberBasis::Origin {
                name: origin.name.clone(),
            },
        };
    }
    let category = match length {
        0..3000 => CopyNumberCategory::High,
        3000..6000 => CopyNumberCategory::Medium,
        _ => CopyNumberCategory::Low,
    };
    CopyNumberEstimate {
        category,
        basis: CopyNumberBasis::Length { length },
    }
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut ret = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            ret.push(',');
        }
        ret.push(c);
    }
    ret
}

pub fn compute_metrics(sequence: &Sequence, annotations: &[Annotation]) -> Metrics {
    let residues = sequence.as_bytes();
    let length = residues.len();
    let gc_category = gc_category(gc_count(residues), length);
    let gc_content_fraction = gc_fraction(residues);
    let copy_number = estimate_copy_number(length, annotations);
    let orf_list = first_orfs(residues, ReadingFrames::Forward);

    let basis = match &copy_number.basis {
        CopyNumberBasis::Origin { name } => format!("from origin {name}"),
        CopyNumberBasis::Length { .. } => "from sequence length".to_string(),
    };
    let summary = format!(
        "**Sequence Length:** {} bp\n\n\
         **GC Content:** {:.2}% ({})\n\n\
         **Estimated Copy Number:** {} ({basis}, estimate)\n\n\
         **ORFs (>= {MIN_ORF_LENGTH} nt, forward frames):** {}\n\n\
         **Features Detected:** {}\n",
        group_thousands(length),
        gc_content_fraction * 100.0,
        gc_category.label(),
        copy_number.category.label(),
        orf_list.len(),
        annotations.len(),
    );

    Metrics {
        sequence_length: length,
        gc_content_fraction,
        gc_category,
        copy_number,
        orf_list,
        summary,
    }
}

/// Windowed GC content for the map's inner ring.
pub fn gc_windows(sequence: &Sequence) -> Vec<GcWindow> {
    GcContents::new_from_sequence(sequence.as_bytes()).into_windows()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Alphabet;
    use plasmid_protocol::{GcCategory, Strand};

    fn origin(name: &str) -> Annotation {
        Annotation::new(name, FeatureType::RepOrigin, 1, 50, Strand::Forward)
    }

    #[test]
    fn origin_identity_decides_copy_number() {
        let high = estimate_copy_number(9000, &[origin("pUC19 ori")]);
        assert_eq!(high.category, CopyNumberCategory::High);
        assert_eq!(
            high.basis,
            CopyNumberBasis::Origin {
                name: "pUC19 ori".to_string()
            }
        );
        let medium = estimate_copy_number(1000, &[origin("P15A ORI")]);
        assert_eq!(medium.category, CopyNumberCategory::Medium);
        let low = estimate_copy_number(1000, &[origin("pBR322 origin")]);
        assert_eq!(low.category, CopyNumberCategory::Low);
    }

    #[test]
    fn unknown_origins_fall_back_to_length() {
        let f1 = [origin("f1 ori"), origin("SV40 ori")];
        assert_eq!(
            estimate_copy_number(2999, &f1).category,
            CopyNumberCategory::High
        );
        assert_eq!(
            estimate_copy_number(3000, &[]).category,
            CopyNumberCategory::Medium
        );
        let long = estimate_copy_number(6000, &[]);
        assert_eq!(long.category, CopyNumberCategory::Low);
        assert_eq!(long.basis, CopyNumberBasis::Length { length: 6000 });
    }

    #[test]
    fn non_origin_features_are_ignored() {
        let promoter = Annotation::new("pUC promoter", FeatureType::Promoter, 1, 20, Strand::Forward);
        assert_eq!(
            estimate_copy_number(7000, &[promoter]).category,
            CopyNumberCategory::Low
        );
        assert!(names_origin("oriF plasmid F", "F"));
        assert!(!names_origin("f1 ori", "F"));
    }

    #[test]
    fn metrics_cover_gc_orfs_and_summary() {
        let orf = format!("ATG{}TAA", "GCC".repeat(120));
        let text = format!("{orf}{}", "AT".repeat(317));
        let sequence = Sequence::parse(&text, Alphabet::Strict).expect("sequence");
        let metrics = compute_metrics(&sequence, &[origin("pUC ori")]);
        assert_eq!(metrics.sequence_length, 1000);
        assert_eq!(metrics.gc_category, GcCategory::Low);
        assert!((metrics.gc_content_fraction - 0.361).abs() < 1e-9);
        assert_eq!(metrics.orf_list.len(), 1);
        assert_eq!(metrics.orf_list[0].start, 1);
        assert_eq!(metrics.copy_number.category, CopyNumberCategory::High);
        assert!(metrics.summary.contains("**Sequence Length:** 1,000 bp"));
        assert!(metrics.summary.contains("36.10% (Low (<40%))"));
        assert!(metrics.summary.contains("**Features Detected:** 1"));
    }

    #[test]
    fn thousands_are_grouped() {
        assert_eq!(group_thousands(7), "7");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn gc_windows_tile_the_sequence() {
        let sequence = Sequence::parse(&"GC".repeat(125), Alphabet::Strict).expect("sequence");
        let windows = gc_windows(&sequence);
        assert_eq!(windows.first().map(|w| (w.start, w.end)), Some((1, 100)));
        assert_eq!(windows.last().map(|w| w.end), Some(250));
        assert!(windows.iter().all(|w| (w.fraction - 1.0).abs() < 1e-9));
    }
}
