//! Headless circular-map layout and SVG export.

use plasmid_protocol::{
    Annotation, CircularMap, FeatureType, GcWindow, MapArc, MapRing, Strand,
};
use svg::Document;
use svg::node::element::{Circle, Group, Line, Path, Rectangle, Text};

const W: f64 = 760.0;
const H: f64 = 760.0;
const BACKBONE_RADIUS: f64 = 240.0;
const OUTER_BAND: f64 = 1.12;
const INNER_BAND: f64 = 0.88;
const LABEL_BAND: f64 = 1.15;
const GC_BAND: f64 = 0.66;

pub fn feature_color(feature_type: FeatureType) -> &'static str {
    match feature_type {
        FeatureType::Promoter => "#d9534f",
        FeatureType::Terminator => "#b4640a",
        FeatureType::RepOrigin => "#c9a400",
        FeatureType::Cds => "#1f4fcc",
        FeatureType::Marker => "#a23fc4",
        FeatureType::Other => "#6e6e6e",
    }
}

/// Maps a 1-based position onto degrees clockwise from twelve o'clock.
fn position_angle(pos: usize, len: usize) -> f64 {
    if len == 0 {
        return 0.0;
    }
    360.0 * (pos as f64 / len as f64)
}

/// Pure layout: forward-strand features on the outer ring, reverse-strand
/// features on the inner ring.
pub fn layout_circular_map(
    title: &str,
    sequence_length: usize,
    annotations: &[Annotation],
    gc_windows: &[GcWindow],
) -> CircularMap {
    let arcs = annotations
        .iter()
        .filter(|a| a.fits(sequence_length))
        .map(|a| {
            let ring = match a.strand {
                Strand::Forward => MapRing::Outer,
                Strand::Reverse => MapRing::Inner,
            };
            MapArc {
                label: a.name.clone(),
                feature_type: a.feature_type,
                strand: a.strand,
                start: a.start,
                end: a.end,
                start_angle: position_angle(a.start - 1, sequence_length),
                end_angle: position_angle(a.end, sequence_length),
                ring,
                color: feature_color(a.feature_type).to_string(),
                hover: format!(
                    "{} ({}) {}..{} ({}) {} bp",
                    a.name,
                    a.feature_type,
                    a.start,
                    a.end,
                    a.strand.as_char(),
                    a.len()
                ),
            }
        })
        .collect();
    CircularMap {
        title: title.to_string(),
        sequence_length,
        center_label: format!("{sequence_length} bp"),
        arcs,
        gc_ring: gc_windows.to_vec(),
    }
}

fn angle2xy(angle: f64, cx: f64, cy: f64, r: f64) -> (f64, f64) {
    let rad = angle.to_radians() - std::f64::consts::FRAC_PI_2;
    (cx + r * rad.cos(), cy + r * rad.sin())
}

fn arc_path(start_angle: f64, end_angle: f64, cx: f64, cy: f64, r: f64) -> Option<String> {
    let sweep_deg = end_angle - start_angle;
    if sweep_deg <= 0.0 {
        return None;
    }
    // A full circle cannot be drawn as a single arc command.
    let end_angle = if sweep_deg >= 360.0 {
        start_angle + 359.99
    } else {
        end_angle
    };
    let large_arc = if end_angle - start_angle > 180.0 { 1 } else { 0 };
    let (x1, y1) = angle2xy(start_angle, cx, cy, r);
    let (x2, y2) = angle2xy(end_angle, cx, cy, r);
    Some(format!(
        "M {x1:.3} {y1:.3} A {r:.3} {r:.3} 0 {large_arc} 1 {x2:.3} {y2:.3}"
    ))
}

pub fn circular_map_svg(map: &CircularMap) -> String {
    let cx = W / 2.0;
    let cy = H / 2.0;
    let r = BACKBONE_RADIUS;

    let mut doc = Document::new()
        .set("viewBox", (0, 0, W, H))
        .set("width", W)
        .set("height", H)
        .add(
            Rectangle::new()
                .set("x", 0)
                .set("y", 0)
                .set("width", W)
                .set("height", H)
                .set("fill", "#ffffff"),
        )
        .add(
            Text::new(map.title.clone())
                .set("x", 20)
                .set("y", 34)
                .set("font-family", "monospace")
                .set("font-size", 16)
                .set("fill", "#111111"),
        )
        .add(
            Circle::new()
                .set("cx", cx)
                .set("cy", cy)
                .set("r", r)
                .set("fill", "none")
                .set("stroke", "#000000")
                .set("stroke-width", 2),
        )
        .add(
            Text::new(map.center_label.clone())
                .set("x", cx)
                .set("y", cy)
                .set("text-anchor", "middle")
                .set("dominant-baseline", "middle")
                .set("font-family", "monospace")
                .set("font-size", 18)
                .set("fill", "#111111"),
        );

    for window in &map.gc_ring {
        let start = position_angle(window.start.saturating_sub(1), map.sequence_length);
        let end = position_angle(window.end, map.sequence_length);
        let (x1, y1) = angle2xy(start, cx, cy, r * GC_BAND);
        let (x2, y2) = angle2xy(end, cx, cy, r * GC_BAND);
        let g = (window.fraction.clamp(0.0, 1.0) * 255.0).round() as u8;
        let rr = 255u8.saturating_sub(g);
        doc = doc.add(
            Line::new()
                .set("x1", x1)
                .set("y1", y1)
                .set("x2", x2)
                .set("y2", y2)
                .set("stroke", format!("#{rr:02x}{g:02x}00"))
                .set("stroke-width", 6),
        );
    }

    for arc in &map.arcs {
        let band = match arc.ring {
            MapRing::Outer => OUTER_BAND,
            MapRing::Inner => INNER_BAND,
        };
        let mut group = Group::new()
            .set("class", format!("feature {}", arc.feature_type))
            .set("data-hover", arc.hover.clone());
        if let Some(d) = arc_path(arc.start_angle, arc.end_angle, cx, cy, r * band) {
            group = group.add(
                Path::new()
                    .set("d", d)
                    .set("fill", "none")
                    .set("stroke", arc.color.clone())
                    .set("stroke-width", 8),
            );
        }
        let mid = (arc.start_angle + arc.end_angle) / 2.0;
        let label_band = match arc.ring {
            MapRing::Outer => LABEL_BAND + 0.05,
            MapRing::Inner => INNER_BAND - 0.08,
        };
        let (lx, ly) = angle2xy(mid, cx, cy, r * label_band);
        group = group.add(
            Text::new(arc.label.clone())
                .set("x", lx)
                .set("y", ly)
                .set("text-anchor", "middle")
                .set("font-family", "monospace")
                .set("font-size", 10)
                .set("fill", "#111111"),
        );
        doc = doc.add(group);
    }

    doc.to_string()
}

/// Markdown table of annotations in position order.
pub fn annotation_table_markdown(annotations: &[Annotation]) -> String {
    if annotations.is_empty() {
        return "No features detected.".to_string();
    }
    let mut rows = annotations.iter().collect::<Vec<_>>();
    rows.sort_by_key(|a| (a.start, a.end));
    let mut out = String::from("| Feature | Type | Start | End | Strand | Length |\n");
    out.push_str("|---|---|---:|---:|:---:|---:|\n");
    for a in rows {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} bp |\n",
            a.name,
            a.feature_type,
            a.start,
            a.end,
            a.strand.as_char(),
            a.len()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Annotation> {
        vec![
            Annotation::new("T7 promoter", FeatureType::Promoter, 1, 20, Strand::Forward),
            Annotation::new("AmpR", FeatureType::Marker, 501, 600, Strand::Reverse),
            Annotation::new("out of range", FeatureType::Other, 990, 1200, Strand::Forward),
        ]
    }

    #[test]
    fn layout_places_strands_on_rings_and_drops_out_of_range() {
        let map = layout_circular_map("demo", 1000, &sample(), &[]);
        assert_eq!(map.arcs.len(), 2);
        assert_eq!(map.arcs[0].ring, MapRing::Outer);
        assert_eq!(map.arcs[1].ring, MapRing::Inner);
        assert!((map.arcs[0].start_angle - 0.0).abs() < 1e-9);
        assert!((map.arcs[0].end_angle - 7.2).abs() < 1e-9);
        assert_eq!(map.center_label, "1000 bp");
        assert!(map.arcs[1].hover.contains("501..600"));
    }

    #[test]
    fn svg_contains_labels_and_center_length() {
        let gc = vec![GcWindow {
            start: 1,
            end: 100,
            fraction: 0.5,
        }];
        let map = layout_circular_map("pDemo", 1000, &sample(), &gc);
        let svg = circular_map_svg(&map);
        assert!(svg.contains("T7 promoter"));
        assert!(svg.contains("AmpR"));
        assert!(svg.contains("1000 bp"));
        assert!(svg.contains("pDemo"));
    }

    #[test]
    fn full_length_feature_still_draws_an_arc() {
        assert!(arc_path(0.0, 360.0, 0.0, 0.0, 10.0).is_some());
        assert!(arc_path(10.0, 10.0, 0.0, 0.0, 10.0).is_none());
    }

    #[test]
    fn table_is_sorted_by_start() {
        let table = annotation_table_markdown(&sample());
        let promoter = table.find("T7 promoter").expect("promoter row");
        let amp = table.find("AmpR").expect("marker row");
        assert!(promoter < amp);
        assert_eq!(annotation_table_markdown(&[]), "No features detected.");
    }
}
