use crate::iupac_code::IupacCode;
use plasmid_protocol::{OrfSpan, Strand};
use rayon::prelude::*;

/// Nucleotides, start and stop codon included.
pub const MIN_ORF_LENGTH: usize = 300;
pub const MAX_REPORTED_ORFS: usize = 10;

const START_CODONS: [[u8; 3]; 3] = [*b"ATG", *b"GTG", *b"TTG"];
const STOP_CODONS: [[u8; 3]; 3] = [*b"TAA", *b"TAG", *b"TGA"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingFrames {
    Forward,
    SixFrame,
}

impl ReadingFrames {
    fn offsets(self) -> &'static [i8] {
        match self {
            Self::Forward => &[1, 2, 3],
            Self::SixFrame => &[1, 2, 3, -1, -2, -3],
        }
    }
}

fn codon_at(sequence: &[u8], pos: usize) -> Option<[u8; 3]> {
    let codon = sequence.get(pos..pos + 3)?;
    Some([
        codon[0].to_ascii_uppercase(),
        codon[1].to_ascii_uppercase(),
        codon[2].to_ascii_uppercase(),
    ])
}

/// Linear scan. Each ORF runs from the first start codon after the previous
/// stop in the same frame up to the next in-frame stop.
pub fn find_orfs(sequence: &[u8], frames: ReadingFrames, min_length: usize) -> Vec<OrfSpan> {
    let reverse = if frames == ReadingFrames::SixFrame {
        IupacCode::reverse_complement(sequence)
    } else {
        Vec::new()
    };
    let mut ret = frames
        .offsets()
        .par_iter()
        .flat_map(|&frame| {
            if frame > 0 {
                scan_frame(sequence, frame, min_length)
            } else {
                scan_frame(&reverse, frame, min_length)
            }
        })
        .collect::<Vec<_>>();
    ret.sort_by_key(|orf| (orf.start, orf.end, orf.frame));
    ret
}

/// ORFs in position order, capped at ten.
pub fn first_orfs(sequence: &[u8], frames: ReadingFrames) -> Vec<OrfSpan> {
    let mut orfs = find_orfs(sequence, frames, MIN_ORF_LENGTH);
    orfs.truncate(MAX_REPORTED_ORFS);
    orfs
}

fn scan_frame(sequence: &[u8], frame: i8, min_length: usize) -> Vec<OrfSpan> {
    let seq_len = sequence.len();
    let offset = frame.unsigned_abs() as usize - 1;
    let mut ret = vec![];
    // Every start pairs with the next in-frame stop, so nested ORFs share it.
    let mut open_starts: Vec<usize> = vec![];
    let mut pos = offset;
    while let Some(codon) = codon_at(sequence, pos) {
        if START_CODONS.contains(&codon) {
            open_starts.push(pos);
        } else if STOP_CODONS.contains(&codon) {
            for start in open_starts.drain(..) {
                let (from, to) = (start, pos + 2);
                if to + 1 - from >= min_length {
                    ret.push(if frame > 0 {
                        OrfSpan {
                            start: from + 1,
                            end: to + 1,
                            frame,
                            strand: Strand::Forward,
                        }
                    } else {
                        OrfSpan {
                            start: seq_len - to,
                            end: seq_len - from,
                            frame,
                            strand: Strand::Reverse,
                        }
                    });
                }
            }
        }
        pos += 3;
    }
    ret
}
