//! Theme index construction and change detection.

use std::collections::{BTreeMap, HashSet};

use survey_core::{AnalysisResult, ThemeAnalysis};

use super::matching::AnalysisMap;

/// Rebuilds theme → response id lists from the response analyses.
///
/// Every theme in `themes` gets an entry; ids are ordered by source row.
/// Themes not in `themes` are ignored.
pub fn build_theme_analyses(
    analyses: &AnalysisMap,
    themes: &[String],
) -> BTreeMap<String, ThemeAnalysis> {
    let mut by_theme: BTreeMap<String, ThemeAnalysis> = themes
        .iter()
        .map(|theme| {
            (
                theme.clone(),
                ThemeAnalysis {
                    theme: theme.clone(),
                    response_ids: Vec::new(),
                },
            )
        })
        .collect();

    let mut ordered: Vec<_> = analyses.values().collect();
    ordered.sort_by(|left, right| {
        left.response
            .row_position
            .cmp(&right.response.row_position)
            .then_with(|| left.response.id.cmp(&right.response.id))
    });

    for analysis in ordered {
        let mut seen = HashSet::new();
        for theme in &analysis.themes {
            if !seen.insert(theme.as_str()) {
                continue;
            }
            if let Some(entry) = by_theme.get_mut(theme) {
                entry.response_ids.push(analysis.response.id.clone());
            }
        }
    }

    by_theme
}

/// Whether `current` differs from the analyses of `previous`.
///
/// True when there is no previous result, the counts differ, or any response
/// is new or has a different content hash.
pub fn responses_changed(current: &AnalysisMap, previous: Option<&AnalysisResult>) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    if current.len() != previous.response_analyses.len() {
        return true;
    }
    current.iter().any(|(id, analysis)| {
        previous
            .response_analyses
            .get(id)
            .is_none_or(|prior| prior.response.content_hash != analysis.response.content_hash)
    })
}

/// Text of every response assigned to `theme`, in row order.
pub fn theme_texts(analysis: &ThemeAnalysis, analyses: &AnalysisMap) -> Vec<String> {
    analysis
        .response_ids
        .iter()
        .filter_map(|id| analyses.get(id))
        .map(|response_analysis| response_analysis.response.text.clone())
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;
    use survey_core::{ResponseAnalysis, ResponseRecord};

    fn analysis(row: usize, text: &str, themes: &[&str]) -> (String, ResponseAnalysis) {
        let record = ResponseRecord::new(row, text);
        let themes = themes.iter().map(|theme| (*theme).to_owned()).collect();
        (record.id.clone(), ResponseAnalysis::new(record, themes))
    }

    fn themes() -> Vec<String> {
        vec!["Parking".to_owned(), "Staff".to_owned(), "Cost".to_owned()]
    }

    #[test]
    fn test_build_theme_analyses() {
        let analyses: AnalysisMap = [
            analysis(10, "late", &["Staff"]),
            analysis(2, "no spaces", &["Parking", "Staff", "Parking"]),
            analysis(3, "weird", &["Aliens"]),
        ]
        .into_iter()
        .collect();

        let built = build_theme_analyses(&analyses, &themes());
        assert_eq!(built.len(), 3);
        assert_eq!(built["Parking"].response_ids, vec!["R2"]);
        assert_eq!(built["Staff"].response_ids, vec!["R2", "R10"]);
        assert!(built["Cost"].response_ids.is_empty());
        assert!(!built.contains_key("Aliens"));
    }

    #[test]
    fn test_responses_changed() {
        let current: AnalysisMap = [analysis(2, "a", &[]), analysis(3, "b", &[])]
            .into_iter()
            .collect();
        assert!(responses_changed(&current, None));

        let mut previous = AnalysisResult::new(themes());
        previous.response_analyses = current.clone();
        assert!(!responses_changed(&current, Some(&previous)));

        let edited: AnalysisMap = [analysis(2, "a", &[]), analysis(3, "b2", &[])]
            .into_iter()
            .collect();
        assert!(responses_changed(&edited, Some(&previous)));

        let shorter: AnalysisMap = [analysis(2, "a", &[])].into_iter().collect();
        assert!(responses_changed(&shorter, Some(&previous)));
    }

    #[test]
    fn test_theme_texts_follow_ids() {
        let analyses: AnalysisMap = [analysis(2, "first", &["Parking"]), analysis(3, "second", &["Parking"])]
            .into_iter()
            .collect();
        let built = build_theme_analyses(&analyses, &themes());
        assert_eq!(theme_texts(&built["Parking"], &analyses), vec!["first", "second"]);
    }
}
