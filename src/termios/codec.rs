//! Packed word format for termios
//!
//! Mirrors the in-memory `struct termios` of the kernel ABI: four flag words,
//! one line-discipline byte, then the control characters. Every word is
//! little-endian by construction (byte `n` of a word is `(word >> 8n) & 0xff`).
//!
//! The control characters therefore start at byte 1 of word 4, not byte 0.
//! Peers that pack the struct word by word put `c_line` there, and reading
//! their words with the characters at byte 0 would shift every one of them.
//!
//! ```text
//! word 0..=3   c_iflag, c_oflag, c_cflag, c_lflag
//! word 4       [c_line=0][cc0][cc1][cc2]
//! word 5..=11  cc3..cc30, four per word
//! word 12      [cc31][0][0][0]
//! ```

use super::{Termios, TermiosError, NCCS};

const FLAG_WORDS: usize = 4;

/// Number of 32-bit words in a packed termios
pub const PACKED_WORDS: usize = FLAG_WORDS + (1 + NCCS).div_ceil(4);

impl Termios {
    /// Pack into the word format
    pub fn to_words(&self) -> [u32; PACKED_WORDS] {
        let mut words = [0u32; PACKED_WORDS];
        words[0] = self.iflag;
        words[1] = self.oflag;
        words[2] = self.cflag;
        words[3] = self.lflag;

        // Byte 0 after the flags is c_line, always N_TTY (0)
        for (i, &c) in self.cc.iter().enumerate() {
            let byte = i + 1;
            words[FLAG_WORDS + byte / 4] |= u32::from(c) << ((byte % 4) * 8);
        }
        words
    }

    /// Unpack from the word format
    ///
    /// Extra trailing words are ignored; fewer than [`PACKED_WORDS`] is an error.
    pub fn from_words(words: &[u32]) -> Result<Self, TermiosError> {
        if words.len() < PACKED_WORDS {
            return Err(TermiosError::Truncated {
                expected: PACKED_WORDS,
                actual: words.len(),
            });
        }

        let mut cc = [0u8; NCCS];
        for (i, c) in cc.iter_mut().enumerate() {
            let byte = i + 1;
            *c = (words[FLAG_WORDS + byte / 4] >> ((byte % 4) * 8)) as u8;
        }
        Ok(Self::new(words[0], words[1], words[2], words[3], cc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_packed_length() {
        assert_eq!(PACKED_WORDS, 13);
    }

    #[test]
    fn test_default_layout() {
        let words = Termios::default().to_words();
        assert_eq!(words[0], 0x6500);
        assert_eq!(words[1], 0x0005);
        assert_eq!(words[2], 0x00bf);
        assert_eq!(words[3], 0x8a3b);
        // c_line, VINTR, VQUIT, VERASE
        assert_eq!(words[4], 0x7f1c_0300);
        // VKILL, VEOF, VTIME, VMIN
        assert_eq!(words[5], 0x0100_0415);
        // VLNEXT, VEOL2, cc17, cc18
        assert_eq!(words[8], 0x0000_0016);
        assert_eq!(words[12] & 0xffff_ff00, 0);
    }

    #[test]
    fn test_last_control_char_in_last_word() {
        let t = Termios::default().with_cc(NCCS - 1, 0xab);
        let words = t.to_words();
        assert_eq!(words[12], 0xab);
    }

    #[test]
    fn test_truncated_words_rejected() {
        let words = Termios::default().to_words();
        let err = Termios::from_words(&words[..PACKED_WORDS - 1]).unwrap_err();
        assert_eq!(
            err,
            TermiosError::Truncated {
                expected: PACKED_WORDS,
                actual: PACKED_WORDS - 1
            }
        );
    }

    #[test]
    fn test_trailing_words_ignored() {
        let t = Termios::default();
        let mut words = t.to_words().to_vec();
        words.extend_from_slice(&[0xdead_beef; 4]);
        assert_eq!(Termios::from_words(&words).unwrap(), t);
    }

    proptest! {
        #[test]
        fn prop_pack_unpack_identity(
            iflag in any::<u32>(),
            oflag in any::<u32>(),
            cflag in any::<u32>(),
            lflag in any::<u32>(),
            cc in any::<[u8; NCCS]>(),
        ) {
            let t = Termios::new(iflag, oflag, cflag, lflag, cc);
            let back = Termios::from_words(&t.to_words()).unwrap();
            prop_assert_eq!(back.cc(), t.cc());
            prop_assert_eq!(back, t);
        }
    }
}
