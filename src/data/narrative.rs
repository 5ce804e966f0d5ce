//! Narrative corpora: one unit per sentence, ids "0", "1", ...

use unicode_segmentation::UnicodeSegmentation;

use crate::data::Unit;

/// The folk tale "Репка", one sentence per entry
pub const REPKA: [&str; 9] = [
    "Посадил дед репку — выросла репка большая пребольшая",
    "Стал дед репку из земли тащить: тянет-потянет, вытащить не может.",
    "Позвал дед на помощь бабку",
    "Бабка за дедку, дедка за репку: тянут-потянут, вытянуть не могут.",
    "Позвала бабка внучку. Внучка за бабку, бабка за дедку, дедка за репку: тянут-потянут, вытянуть не могут.",
    "Кликнула внучка Жучку. Жучка за внучку, внучка за бабку, бабка за дедку, дедка за репку: тянут-потянут, вытянуть не могут.",
    "Кликнула Жучка кошку. Кошка за Жучку, Жучка за внучку, внучка за бабку, бабка за дедку, дедка за репку: тянут-потянут, вытянуть не могут.",
    "Кликнула кошка мышку.",
    "Мышка за кошку, кошка за Жучку, Жучка за внучку, внучка за бабку, бабка за дедку, дедка за репку тянут-потянут — вытащили репку!",
];

/// Units with ordinal ids in input order
pub fn ordinal_units<I, S>(texts: I) -> Vec<Unit>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Unit::new(i.to_string(), text.as_ref().trim()))
        .collect()
}

/// One unit per non-blank line
pub fn lines_to_units(text: &str) -> Vec<Unit> {
    ordinal_units(text.lines().filter(|line| !line.trim().is_empty()))
}

/// Sentences by Unicode sentence boundaries, trimmed, blanks dropped
pub fn split_sentences(text: &str) -> Vec<String> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinal_ids() {
        let units = ordinal_units(REPKA);
        assert_eq!(units.len(), 9);
        assert_eq!(units[0].id, "0");
        assert_eq!(units[8].id, "8");
        assert!(units[0].text.starts_with("Посадил дед репку"));
    }

    #[test]
    fn test_lines_to_units_skips_blank() {
        let units = lines_to_units("первая\n\n  \nвторая\n");
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].id, "1");
        assert_eq!(units[1].text, "вторая");
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("Кликнула кошка мышку. Мышка за кошку! Вытащили репку?");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "Кликнула кошка мышку.");
    }
}
