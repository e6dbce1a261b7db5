//! Header keyword scoring and the keep/discard page decision.
//!
//! Both functions are pure: they never touch storage and never log. The
//! pipeline reports their outcome through a [`crate::PageObserver`].

use crate::models::{Classification, DiscardReason, KeywordScore, ScoringConfig, Verdict};

/// Lower-cases and trims OCR output before keyword matching.
pub fn normalize_ocr_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Counts the distinct keywords contained anywhere in `text`, ignoring case.
pub fn score<S: AsRef<str>>(text: &str, keywords: &[S]) -> KeywordScore {
    let normalized = normalize_ocr_text(text);
    let mut matched: Vec<String> = Vec::new();

    for keyword in keywords {
        let keyword = keyword.as_ref().trim().to_lowercase();
        if keyword.is_empty() || matched.contains(&keyword) {
            continue;
        }
        if normalized.contains(&keyword) {
            matched.push(keyword);
        }
    }

    KeywordScore {
        count: matched.len(),
        matched,
    }
}

/// Keeps a page when it carries at least `config.threshold` header keywords.
///
/// Blank text is discarded as an OCR failure whatever the threshold is, so a
/// threshold of zero still never keeps an empty page.
pub fn classify(text: &str, config: &ScoringConfig) -> Classification {
    if text.trim().is_empty() {
        return Classification {
            verdict: Verdict::Discard,
            reason: Some(DiscardReason::EmptyText),
            score: KeywordScore::default(),
        };
    }

    let score = score(text, &config.keywords);
    if score.count >= config.threshold {
        Classification {
            verdict: Verdict::Keep,
            reason: None,
            score,
        }
    } else {
        Classification {
            verdict: Verdict::Discard,
            reason: Some(DiscardReason::LowScore),
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_HEADER_KEYWORDS;

    const TABLE_HEADER: &str = "STORM DATA AND UNUSUAL WEATHER PHENOMENA\n\
        Location (Place)  Date  Time  Path Length (Miles)  Width (Yards)  \
        Number of Persons Killed Injured  Estimated Damage Property Crops  Character of Storm";

    #[test]
    fn empty_text_scores_zero() {
        let result = score("", &DEFAULT_HEADER_KEYWORDS);
        assert_eq!(result.count, 0);
        assert!(result.matched.is_empty());
    }

    #[test]
    fn scoring_is_case_insensitive() {
        assert_eq!(
            score("DATE", &DEFAULT_HEADER_KEYWORDS),
            score("date", &DEFAULT_HEADER_KEYWORDS)
        );
    }

    #[test]
    fn repeated_keyword_counts_once() {
        let result = score("date date date", &DEFAULT_HEADER_KEYWORDS);
        assert_eq!(result.count, 1);
        assert_eq!(result.matched, vec!["date".to_string()]);
    }

    #[test]
    fn substring_containment_matches_inside_words() {
        let result = score("Updated Timeline", &["date", "time", "line"]);
        assert_eq!(result.count, 3);
    }

    #[test]
    fn full_header_matches_every_keyword() {
        let result = score(TABLE_HEADER, &DEFAULT_HEADER_KEYWORDS);
        assert_eq!(result.count, DEFAULT_HEADER_KEYWORDS.len());
    }

    #[test]
    fn table_header_page_is_kept() {
        let result = classify(TABLE_HEADER, &ScoringConfig::default());
        assert_eq!(result.verdict, Verdict::Keep);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn narrative_page_is_discarded_for_low_score() {
        let result = classify(
            "Climatological summary for the month. Temperatures were above normal.",
            &ScoringConfig::default(),
        );
        assert_eq!(result.verdict, Verdict::Discard);
        assert_eq!(result.reason, Some(DiscardReason::LowScore));
    }

    #[test]
    fn blank_text_is_discarded_even_with_zero_threshold() {
        for text in ["", "   \n\t  "] {
            let result = classify(text, &ScoringConfig::with_threshold(0));
            assert_eq!(result.verdict, Verdict::Discard);
            assert_eq!(result.reason, Some(DiscardReason::EmptyText));
        }
    }

    #[test]
    fn threshold_is_a_plain_cutoff() {
        let config = ScoringConfig::with_threshold(3);
        let at_threshold = "location date time";
        let above_threshold = "location date time path mile";
        let below_threshold = "location date";

        assert!(classify(at_threshold, &config).is_keep());
        assert!(classify(above_threshold, &config).is_keep());
        assert!(!classify(below_threshold, &config).is_keep());
    }

    #[test]
    fn threshold_and_vocabulary_are_configurable() {
        let config = ScoringConfig {
            threshold: 2,
            keywords: vec!["hail".to_string(), "tornado".to_string()],
        };
        assert!(classify("Tornado with large hail", &config).is_keep());
        assert!(!classify("location date time path mile yard", &config).is_keep());
    }

    #[test]
    fn reclassification_is_idempotent() {
        let config = ScoringConfig::default();
        let first = classify(TABLE_HEADER, &config);
        let second = classify(TABLE_HEADER, &config);
        assert_eq!(first, second);
    }
}
