//! Visualization payloads for the metrics sink.
//!
//! Histograms and the option/token usage matrix are embedded into the
//! metrics dictionary as data objects; the experiment-tracking collaborator
//! decides how to draw them.

use crate::eval::WordsDict;
use crate::training::StatSeries;
use crate::MetricValue;
use std::collections::BTreeMap;

/// Per-key success rates as a labelled histogram.
pub fn success_histogram(stats: &BTreeMap<String, StatSeries>) -> MetricValue {
    MetricValue::Histogram(
        stats
            .iter()
            .map(|(key, series)| (key.clone(), series.mean()))
            .collect(),
    )
}

/// Count how often each word was spoken while each option was active.
///
/// Words in `skip_words` (articles, stop words) are excluded. Rows are
/// sorted by word for stable output.
pub fn token_usage(words: &WordsDict, num_options: i64, skip_words: &[String]) -> MetricValue {
    let mut counts: BTreeMap<String, Vec<u64>> = BTreeMap::new();

    for (option, spoken) in words.iter() {
        let idx = *option as usize;
        if idx >= num_options as usize {
            continue;
        }
        for word in spoken {
            if skip_words.iter().any(|s| s == word) {
                continue;
            }
            counts.entry(word.clone()).or_insert_with(|| vec![0; num_options as usize])[idx] += 1;
        }
    }

    MetricValue::TokenMatrix {
        num_options: num_options as usize,
        rows: counts.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_histogram_means() {
        let mut stats: BTreeMap<String, StatSeries> = BTreeMap::new();
        let series = stats.entry("push".to_string()).or_default();
        series.push(1.0);
        series.push(0.0);

        let hist = success_histogram(&stats);
        match hist {
            MetricValue::Histogram(bars) => {
                assert_eq!(bars, vec![("push".to_string(), 0.5)]);
            }
            _ => panic!("expected histogram"),
        }
    }

    #[test]
    fn test_token_usage_skips_words() {
        let mut words = WordsDict::new();
        words.reset(2);
        words.record(0, &["open".into(), "the".into(), "drawer".into()]);
        words.record(1, &["open".into()]);

        let matrix = token_usage(&words, 2, &["the".to_string()]);
        match matrix {
            MetricValue::TokenMatrix { num_options, rows } => {
                assert_eq!(num_options, 2);
                assert_eq!(rows.len(), 2); // "open", "drawer"
                let open = rows.iter().find(|(w, _)| w == "open").unwrap();
                assert_eq!(open.1, vec![1, 1]);
            }
            _ => panic!("expected token matrix"),
        }
    }
}
