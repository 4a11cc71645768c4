const DNA_BITMASK_A: u8 = 1;
const DNA_BITMASK_C: u8 = 2;
const DNA_BITMASK_G: u8 = 4;
const DNA_BITMASK_T: u8 = 8;
const DNA_BITMASK_N: u8 = DNA_BITMASK_A | DNA_BITMASK_C | DNA_BITMASK_G | DNA_BITMASK_T;

/// A bitmasked IUPAC nucleotide code, eg DNA_BITMASK_A|DNA_BITMASK_G for R.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct IupacCode(u8);

impl IupacCode {
    #[inline(always)]
    pub fn from_letter(letter: u8) -> Self {
        match letter.to_ascii_uppercase() {
            b'A' => Self(DNA_BITMASK_A),
            b'C' => Self(DNA_BITMASK_C),
            b'G' => Self(DNA_BITMASK_G),
            b'T' => Self(DNA_BITMASK_T),
            b'W' => Self(DNA_BITMASK_A | DNA_BITMASK_T),
            b'S' => Self(DNA_BITMASK_C | DNA_BITMASK_G),
            b'M' => Self(DNA_BITMASK_A | DNA_BITMASK_C),
            b'K' => Self(DNA_BITMASK_G | DNA_BITMASK_T),
            b'R' => Self(DNA_BITMASK_A | DNA_BITMASK_G),
            b'Y' => Self(DNA_BITMASK_C | DNA_BITMASK_T),
            b'B' => Self(DNA_BITMASK_C | DNA_BITMASK_G | DNA_BITMASK_T),
            b'D' => Self(DNA_BITMASK_A | DNA_BITMASK_G | DNA_BITMASK_T),
            b'H' => Self(DNA_BITMASK_A | DNA_BITMASK_C | DNA_BITMASK_T),
            b'V' => Self(DNA_BITMASK_A | DNA_BITMASK_C | DNA_BITMASK_G),
            b'N' => Self(DNA_BITMASK_N),
            _ => Self(0),
        }
    }

    pub fn letter(self) -> u8 {
        match self.0 {
            DNA_BITMASK_A => b'A',
            DNA_BITMASK_C => b'C',
            DNA_BITMASK_G => b'G',
            DNA_BITMASK_T => b'T',
            0b1001 => b'W',
            0b0110 => b'S',
            0b0011 => b'M',
            0b1100 => b'K',
            0b0101 => b'R',
            0b1010 => b'Y',
            0b1110 => b'B',
            0b1101 => b'D',
            0b1011 => b'H',
            0b0111 => b'V',
            DNA_BITMASK_N => b'N',
            _ => b'-',
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True for exactly one of A, C, G, T.
    #[inline(always)]
    pub fn is_unambiguous(&self) -> bool {
        self.0.count_ones() == 1
    }

    /// Every base this code stands for is allowed by `pattern`.
    #[inline(always)]
    pub fn within(self, pattern: Self) -> bool {
        !self.is_empty() && self.0 & !pattern.0 == 0
    }

    /// A<->T and C<->G applied to every base in the set.
    pub fn complement(self) -> Self {
        let mut mask = 0;
        if self.0 & DNA_BITMASK_A != 0 {
            mask |= DNA_BITMASK_T;
        }
        if self.0 & DNA_BITMASK_T != 0 {
            mask |= DNA_BITMASK_A;
        }
        if self.0 & DNA_BITMASK_C != 0 {
            mask |= DNA_BITMASK_G;
        }
        if self.0 & DNA_BITMASK_G != 0 {
            mask |= DNA_BITMASK_C;
        }
        Self(mask)
    }

    #[inline(always)]
    pub fn letter_complement(letter: u8) -> u8 {
        Self::from_letter(letter).complement().letter()
    }

    pub fn reverse_complement(sequence: &[u8]) -> Vec<u8> {
        sequence
            .iter()
            .rev()
            .map(|&letter| Self::letter_complement(letter))
            .collect()
    }

    /// Pattern match where the pattern may carry ambiguity codes but each
    /// sequence residue must fall entirely inside the pattern's set.
    pub fn matches_at(sequence: &[u8], pattern: &[u8], pos: usize) -> bool {
        match sequence.get(pos..pos + pattern.len()) {
            Some(window) => window.iter().zip(pattern).all(|(&residue, &p)| {
                Self::from_letter(residue).within(Self::from_letter(p))
            }),
            None => false,
        }
    }
}
