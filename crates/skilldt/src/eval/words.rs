//! Token collection per option during evaluation rollouts.

use std::collections::BTreeMap;

/// Words observed while each option was active, across one evaluation pass.
///
/// Reset once per evaluation call; mutated by the rollout routine, read by
/// the token-usage visualization afterwards.
#[derive(Clone, Debug, Default)]
pub struct WordsDict {
    options: BTreeMap<i64, Vec<String>>,
}

impl WordsDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh collection with one empty list per option.
    pub fn reset(&mut self, num_options: i64) {
        self.options = (0..num_options).map(|i| (i, Vec::new())).collect();
    }

    /// Record words spoken while `option` was active.
    pub fn record(&mut self, option: i64, words: &[String]) {
        self.options
            .entry(option)
            .or_default()
            .extend(words.iter().cloned());
    }

    pub fn words_for(&self, option: i64) -> &[String] {
        self.options
            .get(&option)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i64, &Vec<String>)> {
        self.options.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.options.values().all(|w| w.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_creates_empty_lists() {
        let mut dict = WordsDict::new();
        dict.record(3, &["stale".into()]);
        dict.reset(4);
        assert!(dict.is_empty());
        assert_eq!(dict.iter().count(), 4);
    }

    #[test]
    fn test_record_accumulates() {
        let mut dict = WordsDict::new();
        dict.reset(2);
        dict.record(0, &["open".into(), "drawer".into()]);
        dict.record(0, &["open".into()]);
        assert_eq!(dict.words_for(0).len(), 3);
        assert!(dict.words_for(1).is_empty());
    }
}
