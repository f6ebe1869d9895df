//! The fixed query alphabet walked by the collector.

/// Latin letters, digits, then the Russian alphabet with `ё` after `е`.
pub const DEFAULT_ALPHABET: [&str; 69] = [
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m",
    "n", "o", "p", "q", "r", "s", "t", "u", "v", "w", "x", "y", "z",
    "0", "1", "2", "3", "4", "5", "6", "7", "8", "9",
    "а", "б", "в", "г", "д", "е", "ё", "ж", "з", "и", "й", "к", "л", "м",
    "н", "о", "п", "р", "с", "т", "у", "ф", "х", "ц", "ч", "ш", "щ", "ъ",
    "ы", "ь", "э", "ю", "я",
];

pub fn default_alphabet() -> Vec<String> {
    DEFAULT_ALPHABET.iter().map(|t| t.to_string()).collect()
}

/// Tokens of `alphabet` not yet in `processed`, in alphabet order.
pub fn remaining(alphabet: &[String], processed: &[String]) -> Vec<String> {
    alphabet
        .iter()
        .filter(|token| !processed.contains(token))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_alphabet_is_unique() {
        let alphabet = default_alphabet();
        let mut sorted = alphabet.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), alphabet.len());
        assert_eq!(alphabet.first().map(String::as_str), Some("a"));
        assert_eq!(alphabet.last().map(String::as_str), Some("я"));
    }

    #[test]
    fn test_remaining_preserves_alphabet_order() {
        let alphabet: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        // processed order does not matter, alphabet order wins
        let processed = vec!["c".to_string(), "a".to_string(), "zz".to_string()];
        assert_eq!(remaining(&alphabet, &processed), vec!["b".to_string(), "d".to_string()]);
    }

    #[test]
    fn test_remaining_empty_when_all_processed() {
        let alphabet = default_alphabet();
        assert!(remaining(&alphabet, &alphabet).is_empty());
    }
}
