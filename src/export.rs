//! File exports of a finished plasmid.

use crate::extract::Sequence;
use anyhow::{Context, Result};
use bio::io::fasta;
use gb_io::seq::{Feature, Location, Seq, Topology};

// gb-io 0.9 represents feature kinds and qualifier keys as `Cow<'static, str>`.
type FeatureKind = std::borrow::Cow<'static, str>;
type QualifierKey = std::borrow::Cow<'static, str>;
use plasmid_protocol::{Annotation, CircularMap, FeatureType, Strand};
use plasmid_render::circular_map_svg;
use std::fs::{self, File};
use std::path::Path;

pub fn write_fasta(path: &Path, name: &str, sequence: &Sequence) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Could not create '{}'", path.display()))?;
    let description = format!("circular {} bp", sequence.len());
    let mut writer = fasta::Writer::new(file);
    writer.write(name, Some(description.as_str()), sequence.as_bytes())?;
    writer.flush()?;
    Ok(())
}

fn feature_kind(feature_type: FeatureType) -> &'static str {
    match feature_type {
        FeatureType::RepOrigin => "rep_origin",
        FeatureType::Marker | FeatureType::Cds => "CDS",
        FeatureType::Promoter => "promoter",
        FeatureType::Terminator => "terminator",
        FeatureType::Other => "misc_feature",
    }
}

fn genbank_feature(annotation: &Annotation) -> Feature {
    // 1-based inclusive to 0-based half-open
    let range = Location::simple_range(annotation.start as i64 - 1, annotation.end as i64);
    let location = match annotation.strand {
        Strand::Forward => range,
        Strand::Reverse => Location::Complement(Box::new(range)),
    };
    let mut qualifiers: Vec<(QualifierKey, Option<String>)> =
        vec![("label".into(), Some(annotation.name.clone()))];
    if annotation.feature_type == FeatureType::Marker {
        qualifiers.push(("note".into(), Some("selection marker".to_string())));
    }
    Feature {
        kind: FeatureKind::from(feature_kind(annotation.feature_type)),
        location,
        qualifiers,
    }
}

pub fn genbank_record(name: &str, sequence: &Sequence, annotations: &[Annotation]) -> Seq {
    Seq {
        name: Some(name.to_string()),
        topology: Topology::Circular,
        len: Some(sequence.len()),
        molecule_type: Some("DNA".to_string()),
        definition: Some(format!("Generated plasmid {name}")),
        seq: sequence.as_bytes().to_vec(),
        features: annotations
            .iter()
            .filter(|a| a.fits(sequence.len()))
            .map(genbank_feature)
            .collect(),
        ..Seq::empty()
    }
}

pub fn write_genbank(
    path: &Path,
    name: &str,
    sequence: &Sequence,
    annotations: &[Annotation],
) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Could not create '{}'", path.display()))?;
    gb_io::writer::write(file, &genbank_record(name, sequence, annotations))?;
    Ok(())
}

pub fn write_svg(path: &Path, map: &CircularMap) -> Result<()> {
    fs::write(path, circular_map_svg(map))
        .with_context(|| format!("Could not write '{}'", path.display()))
}
