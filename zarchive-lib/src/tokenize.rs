//! Word splitting for the reverse index, and the byte-level plus-plus scanner.

use crate::magic;
use caseless::Caseless;
use std::collections::BTreeMap;
use unicode_normalization::char::canonical_combining_class;
use unicode_normalization::UnicodeNormalization;

/// Net plus-plus deltas per key, as produced by one scan. An entry exists
/// even when the mentions net to zero.
pub type PpDeltas = BTreeMap<String, i64>;

/// True if `ch` can appear inside an indexed word: ASCII alphanumerics and
/// underscore, or any non-ASCII letter/mark/number.
fn is_word_char(ch: char) -> bool {
    if ch.is_ascii() {
        ch.is_ascii_alphanumeric() || ch == '_'
    } else {
        ch.is_alphanumeric() || canonical_combining_class(ch) != 0
    }
}

/// Splits text into indexable words and folds them for matching.
pub struct WordSplitter;

impl WordSplitter {
    /// The maximal runs of word characters in `text`, case preserved.
    pub fn split(text: &str) -> Vec<&str> {
        let mut words = Vec::new();
        let mut start: Option<usize> = None;
        for (pos, ch) in text.char_indices() {
            if is_word_char(ch) {
                if start.is_none() {
                    start = Some(pos);
                }
            } else if let Some(s) = start.take() {
                words.push(&text[s..pos]);
            }
        }
        if let Some(s) = start {
            words.push(&text[s..]);
        }
        words
    }

    /// Compatibility caseless folding (Unicode D146): this is what makes
    /// "CINNABON", "Cinnabon" and "𝐂𝐈𝐍𝐍𝐀𝐁𝐎𝐍" index to the same term.
    /// Queries must be folded with the same function.
    pub fn fold(word: &str) -> String {
        word.chars()
            .nfd()
            .default_case_fold()
            .nfkd()
            .default_case_fold()
            .nfkd()
            .collect()
    }

    /// Split and fold in one step.
    pub fn split_folded(text: &str) -> Vec<String> {
        Self::split(text).into_iter().map(Self::fold).collect()
    }
}

/// Scans zgram bodies for `key++` / `key--` / `key??` / `key~~` mentions.
///
/// This is deliberately a byte scanner, not Unicode-aware: a key starts with
/// an ASCII letter, underscore, or *any* byte above 0x7f, continues with the
/// same plus ASCII digits, and must be immediately followed by a doubled
/// operator. `++` contributes `+parity`, `--` contributes `-parity`, and
/// `??`/`~~` contribute zero (but still count as mentions). The single-letter
/// keys `c` and `C` are carved out so that C++ and C-- stay programming
/// languages.
pub struct PlusPlusScanner;

impl PlusPlusScanner {
    pub fn scan(body: &str, parity: i64, net_counts: &mut PpDeltas) {
        fn is_first_char_of_key(b: u8) -> bool {
            b.is_ascii_alphabetic() || b == b'_' || b > 0x7f
        }
        fn is_middle_char_of_key(b: u8) -> bool {
            is_first_char_of_key(b) || b.is_ascii_digit()
        }
        fn operator_delta(b: u8, parity: i64) -> Option<i64> {
            match b {
                b'+' => Some(parity),
                b'-' => Some(-parity),
                b'?' | b'~' => Some(0),
                _ => None,
            }
        }

        let bytes = body.as_bytes();
        let end = bytes.len();
        let mut current = 0;
        while current != end {
            if !is_first_char_of_key(bytes[current]) {
                current += 1;
                continue;
            }
            let key_start = current;
            current += 1;

            // Have [A-Za-z_{non-ascii}]
            while current != end {
                let ch = bytes[current];
                if is_middle_char_of_key(ch) {
                    current += 1;
                    continue;
                }
                // Have a complete candidate key
                let potential_key = &bytes[key_start..current];
                if potential_key.len() > magic::MAX_PLUS_PLUS_KEY_SIZE {
                    break;
                }
                let delta = match operator_delta(ch, parity) {
                    Some(d) => d,
                    None => break,
                };
                current += 1;
                // Is the operator doubled?
                if current == end || bytes[current] != ch {
                    break;
                }
                current += 1;

                // carve out [cC]++ / -- / etc
                if potential_key == b"c" || potential_key == b"C" {
                    break;
                }

                // Keys start at a char boundary and stop before an ASCII
                // operator, so this cannot split a UTF-8 sequence.
                let key = String::from_utf8_lossy(potential_key).into_owned();
                *net_counts.entry(key).or_insert(0) += delta;
                break;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_basic() {
        let words = WordSplitter::split("What's with all the hurly-burly?");
        assert_eq!(
            words,
            vec!["What", "s", "with", "all", "the", "hurly", "burly"]
        );
    }

    #[test]
    fn test_split_unicode() {
        let words = WordSplitter::split("I ❤ to eat π and 𝐂𝐈𝐍𝐍𝐀𝐁𝐎𝐍 at the café");
        assert_eq!(
            words,
            vec!["I", "to", "eat", "π", "and", "𝐂𝐈𝐍𝐍𝐀𝐁𝐎𝐍", "at", "the", "café"]
        );
    }

    #[test]
    fn test_fold_compatibility() {
        assert_eq!(WordSplitter::fold("CINNABON"), WordSplitter::fold("cinnabon"));
        assert_eq!(
            WordSplitter::fold("𝐂𝐈𝐍𝐍𝐀𝐁𝐎𝐍"),
            WordSplitter::fold("Cinnabon")
        );
        assert_ne!(WordSplitter::fold("café"), WordSplitter::fold("cafe"));
    }

    #[test]
    fn test_scan_simple() {
        let mut deltas = PpDeltas::new();
        PlusPlusScanner::scan("kosak++ blah kosak++", 1, &mut deltas);
        assert_eq!(deltas.get("kosak"), Some(&2));
        assert_eq!(deltas.len(), 1);
    }

    #[test]
    fn test_scan_parity() {
        let mut deltas = PpDeltas::new();
        PlusPlusScanner::scan("kosak++ blah kosak++", -1, &mut deltas);
        assert_eq!(deltas.get("kosak"), Some(&-2));
    }

    #[test]
    fn test_scan_minus_and_zero_ops() {
        let mut deltas = PpDeltas::new();
        PlusPlusScanner::scan("alpha-- beta?? gamma~~ alpha++", 1, &mut deltas);
        assert_eq!(deltas.get("alpha"), Some(&0));
        assert_eq!(deltas.get("beta"), Some(&0));
        assert_eq!(deltas.get("gamma"), Some(&0));
        assert_eq!(deltas.len(), 3);
    }

    #[test]
    fn test_scan_c_carve_out() {
        let mut deltas = PpDeltas::new();
        PlusPlusScanner::scan("I am jealous of your C++ skills. And C--. And c++.", 1, &mut deltas);
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_scan_needs_doubled_operator() {
        let mut deltas = PpDeltas::new();
        PlusPlusScanner::scan("a+b c+ d+++", 1, &mut deltas);
        // "d+++" scans as d++ followed by a stray '+'
        assert_eq!(deltas.get("d"), Some(&1));
        assert_eq!(deltas.len(), 1);
    }

    #[test]
    fn test_scan_non_ascii_key() {
        let mut deltas = PpDeltas::new();
        PlusPlusScanner::scan("π++ and zamboni7++", 1, &mut deltas);
        assert_eq!(deltas.get("π"), Some(&1));
        assert_eq!(deltas.get("zamboni7"), Some(&1));
    }

    #[test]
    fn test_scan_digit_cannot_start_key() {
        let mut deltas = PpDeltas::new();
        PlusPlusScanner::scan("867++", 1, &mut deltas);
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_scan_key_size_cap() {
        let long_key = "k".repeat(magic::MAX_PLUS_PLUS_KEY_SIZE + 1);
        let mut deltas = PpDeltas::new();
        PlusPlusScanner::scan(&format!("{long_key}++"), 1, &mut deltas);
        assert!(deltas.is_empty());
    }
}
