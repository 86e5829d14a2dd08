//! Printable-ASCII substitution applied to the remote hello line.
//!
//! This is masking only: a fixed, keyless permutation of the 94 characters
//! `!`..=`~`. It hides the line from a casual look at a packet capture and
//! gives no confidentiality or authentication guarantee. Space, control
//! characters and non-ASCII pass through unchanged.

const FIRST: u8 = b'!';

const ENCODE: [u8; 94] = [
    8, 85, 70, 53, 93, 72, 61, 1, 41, 36, 49, 92, 44, 42, 25, 58, 81, 15, 57, 10, 54, 60, 12, 45,
    43, 91, 22, 86, 65, 9, 27, 18, 37, 39, 2, 68, 46, 71, 6, 79, 76, 84, 59, 75, 82, 4, 48, 55, 64,
    3, 7, 56, 40, 73, 77, 69, 88, 13, 35, 11, 66, 26, 52, 78, 28, 89, 51, 0, 30, 50, 34, 5, 32, 21,
    14, 38, 19, 29, 24, 33, 47, 31, 80, 16, 83, 90, 67, 23, 20, 17, 74, 62, 87, 63,
];

const DECODE: [u8; 94] = [
    67, 7, 34, 49, 45, 71, 38, 50, 0, 29, 19, 59, 22, 57, 74, 17, 83, 89, 31, 76, 88, 73, 26, 87,
    78, 14, 61, 30, 64, 77, 68, 81, 72, 79, 70, 58, 9, 32, 75, 33, 52, 8, 13, 24, 12, 23, 36, 80,
    46, 10, 69, 66, 62, 3, 20, 47, 51, 18, 15, 42, 21, 6, 91, 93, 48, 28, 60, 86, 35, 55, 2, 37, 5,
    53, 90, 43, 40, 54, 63, 39, 82, 16, 44, 84, 41, 1, 27, 92, 56, 65, 85, 25, 11, 4,
];

fn substitute(table: &[u8; 94], text: &str) -> String {
    text.chars()
        .map(|c| match u8::try_from(c) {
            Ok(b) if (FIRST..=b'~').contains(&b) => char::from(table[usize::from(b - FIRST)] + FIRST),
            _ => c,
        })
        .collect()
}

pub fn mask(text: &str) -> String {
    substitute(&ENCODE, text)
}

pub fn unmask(text: &str) -> String {
    substitute(&DECODE, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_inverse_permutations() {
        let mut seen = [false; 94];
        for (i, &e) in ENCODE.iter().enumerate() {
            assert!(!seen[usize::from(e)]);
            seen[usize::from(e)] = true;
            assert_eq!(usize::from(DECODE[usize::from(e)]), i);
        }
    }

    #[test]
    fn test_known_masking() {
        assert_eq!(mask("precimon"), "B@?TA49>");
    }

    #[test]
    fn test_space_and_newline_unchanged() {
        let masked = mask("a b\n");
        assert_eq!(masked.chars().nth(1), Some(' '));
        assert!(masked.ends_with('\n'));
        assert_eq!(unmask(&masked), "a b\n");
    }

    #[test]
    fn test_unmask_restores_printable_ascii() {
        let all: String = (b'!'..=b'~').map(char::from).collect();
        assert_ne!(mask(&all), all);
        assert_eq!(unmask(&mask(&all)), all);
    }

    #[test]
    fn test_non_ascii_passes_through() {
        assert_eq!(mask("é"), "é");
    }
}
