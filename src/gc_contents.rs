use plasmid_protocol::{GcCategory, GcWindow};

pub const GC_WINDOW_SIZE: usize = 100;

/// Number of G or C residues, case-insensitive. S counts as well.
pub fn gc_count(sequence: &[u8]) -> usize {
    sequence
        .iter()
        .map(|c| c.to_ascii_uppercase())
        .filter(|&c| c == b'G' || c == b'C' || c == b'S')
        .count()
}

pub fn gc_fraction(sequence: &[u8]) -> f64 {
    if sequence.is_empty() {
        return 0.0;
    }
    gc_count(sequence) as f64 / sequence.len() as f64
}

/// Band membership in integer arithmetic: below 40% is low, above 55% is
/// high, and both boundaries belong to medium.
pub fn gc_category(gc: usize, length: usize) -> GcCategory {
    if 100 * gc < 40 * length {
        GcCategory::Low
    } else if 100 * gc > 55 * length {
        GcCategory::High
    } else {
        GcCategory::Medium
    }
}

#[derive(Clone, Debug, Default)]
pub struct GcContents {
    windows: Vec<GcWindow>,
}

impl GcContents {
    pub fn new_from_sequence(sequence: &[u8]) -> Self {
        Self::with_window_size(sequence, GC_WINDOW_SIZE)
    }

    pub fn with_window_size(sequence: &[u8], window_size: usize) -> Self {
        let section_size = sequence.len().min(window_size.max(1));
        let windows = sequence
            .chunks(section_size.max(1))
            .enumerate()
            .map(|(i, chunk)| {
                let from = i * section_size;
                GcWindow {
                    start: from + 1,
                    end: from + chunk.len(),
                    fraction: gc_fraction(chunk),
                }
            })
            .collect();
        Self { windows }
    }

    #[inline(always)]
    pub fn windows(&self) -> &[GcWindow] {
        &self.windows
    }

    pub fn into_windows(self) -> Vec<GcWindow> {
        self.windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_gc(gc: usize, length: usize) -> Vec<u8> {
        let mut seq = vec![b'G'; gc];
        seq.resize(length, b'A');
        seq
    }

    #[test]
    fn short_sequence_is_one_window() {
        let gc_contents = GcContents::new_from_sequence(b"AAAGGGTTTCCC");
        assert_eq!(
            gc_contents.windows(),
            &[GcWindow {
                start: 1,
                end: 12,
                fraction: 0.5
            }]
        );
    }

    #[test]
    fn windows_cover_sequence_with_short_tail() {
        let seq = with_gc(120, 250);
        let windows = GcContents::new_from_sequence(&seq).into_windows();
        assert_eq!(windows.len(), 3);
        assert_eq!((windows[2].start, windows[2].end), (201, 250));
        assert_eq!(windows[0].fraction, 1.0);
        assert!((windows[1].fraction - 0.2).abs() < 1e-12);
        assert_eq!(windows[2].fraction, 0.0);
        assert!(GcContents::new_from_sequence(b"").windows().is_empty());
    }

    #[test]
    fn category_boundaries_belong_to_medium() {
        assert_eq!(gc_category(400, 1000), GcCategory::Medium);
        assert_eq!(gc_category(550, 1000), GcCategory::Medium);
        assert_eq!(gc_category(399, 1000), GcCategory::Low);
        assert_eq!(gc_category(551, 1000), GcCategory::High);
        assert_eq!(gc_count(&with_gc(551, 1000)), 551);
    }

    #[test]
    fn lower_case_residues_count() {
        assert_eq!(gc_count(b"gcAT"), 2);
        assert!((gc_fraction(b"gcAT") - 0.5).abs() < 1e-12);
    }
}
