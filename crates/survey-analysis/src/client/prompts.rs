//! Prompt construction.
//!
//! Every builder here is a pure function of its inputs: the same responses,
//! themes and settings always produce byte-identical text, which keeps cache
//! fingerprints stable between runs.

use std::collections::BTreeMap;

use survey_core::{OutputLanguage, ThemeSummary};

/// Responses included when asking for themes.
pub const IDENTIFY_SAMPLE_CAP: usize = 50;
/// Character budget per response when identifying themes.
pub const IDENTIFY_TRUNCATE_CHARS: usize = 500;
/// Character budget per response when matching or summarizing.
pub const RESPONSE_TRUNCATE_CHARS: usize = 300;
/// Responses included in one theme summary prompt.
pub const THEME_SUMMARY_MAX_RESPONSES: usize = 15;
/// Ideas per theme quoted in the global summary prompt.
pub const GLOBAL_SUMMARY_MAX_IDEAS: usize = 3;
/// Responses per theme quoted in the legacy summary prompt.
pub const LEGACY_SUMMARY_MAX_RESPONSES: usize = 10;
/// Instruction used for the global summary when none is configured.
pub const DEFAULT_GLOBAL_SUMMARY_PROMPT: &str =
    "Summarize the main points made in each theme and highlight any unique ideas or problems mentioned.";

/// Shortens `text` to `budget` characters, ending in `...` when cut.
pub fn truncate(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_owned();
    }
    let kept: String = text.chars().take(budget.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Evenly strided subset of at most [`IDENTIFY_SAMPLE_CAP`] responses.
pub fn sample_responses(responses: &[String]) -> Vec<&str> {
    if responses.len() <= IDENTIFY_SAMPLE_CAP {
        return responses.iter().map(String::as_str).collect();
    }
    let stride = responses.len() / IDENTIFY_SAMPLE_CAP;
    responses
        .iter()
        .step_by(stride)
        .take(IDENTIFY_SAMPLE_CAP)
        .map(String::as_str)
        .collect()
}

fn append_language(prompt: &mut String, separator: &str, language: OutputLanguage) {
    if let Some(instruction) = language.instruction() {
        prompt.push_str(separator);
        prompt.push_str(instruction);
    }
}

fn numbered_themes(themes: &[String]) -> String {
    themes
        .iter()
        .enumerate()
        .map(|(index, theme)| format!("{}. {theme}\n", index + 1))
        .collect()
}

/// Theme discovery prompt over a strided sample of `responses`.
pub fn identify_themes(responses: &[String], language: OutputLanguage) -> String {
    let sample = sample_responses(responses);
    let listed: String = sample
        .iter()
        .enumerate()
        .map(|(index, response)| {
            format!(
                "{}: {}\n",
                index + 1,
                truncate(response, IDENTIFY_TRUNCATE_CHARS)
            )
        })
        .collect();

    let mut prompt = format!(
        "Identify main themes in these {} survey responses (sample of {} total):\n\n{listed}\n\n\
         Return the themes as a list with each theme on its own line starting with a dash.",
        sample.len(),
        responses.len()
    );
    append_language(&mut prompt, " ", language);
    prompt
}

/// Matching prompt for one response.
pub fn match_response(response: &str, themes: &[String]) -> String {
    format!(
        "Here is a survey response:\n\n{}\n\nHere are the themes:\n{}\n\n\
         Which themes does this response relate to? Return the theme numbers as a list \
         with each number on its own line starting with a dash.",
        truncate(response, IDENTIFY_TRUNCATE_CHARS),
        numbered_themes(themes)
    )
}

/// Matching prompt for a batch, answered with one `RESPONSE <n>:` line each.
pub fn match_batch(responses: &[String], themes: &[String]) -> String {
    let listed: String = responses
        .iter()
        .enumerate()
        .map(|(index, response)| {
            format!(
                "RESPONSE {}: {}\n\n",
                index + 1,
                truncate(response, RESPONSE_TRUNCATE_CHARS)
            )
        })
        .collect();
    format!(
        "Analyze multiple survey responses and match each to relevant themes.\n\n\
         Themes:\n{}\n\
         For each response, identify which themes apply. Format your answer as:\n\
         RESPONSE 1: [comma-separated theme numbers]\nRESPONSE 2: [comma-separated theme numbers]\n...\n\n\
         {listed}",
        numbered_themes(themes)
    )
}

/// Picks the responses quoted for a theme: all of them, or the shortest
/// [`THEME_SUMMARY_MAX_RESPONSES`] by a stable sort.
fn select_for_summary(responses: &[String]) -> Vec<&str> {
    let mut selected: Vec<&str> = responses.iter().map(String::as_str).collect();
    if selected.len() > THEME_SUMMARY_MAX_RESPONSES {
        selected.sort_by_key(|text| text.chars().count());
        selected.truncate(THEME_SUMMARY_MAX_RESPONSES);
    }
    selected
}

/// Summary prompt for one theme, asking for SUMMARY and UNIQUE IDEAS sections.
pub fn theme_summary(theme: &str, responses: &[String], language: OutputLanguage) -> String {
    let listed: String = select_for_summary(responses)
        .into_iter()
        .map(|response| format!("\n- {}", truncate(response, RESPONSE_TRUNCATE_CHARS)))
        .collect();
    let shown = if responses.len() > THEME_SUMMARY_MAX_RESPONSES {
        format!(
            "\n\n(Showing {THEME_SUMMARY_MAX_RESPONSES} of {} responses)",
            responses.len()
        )
    } else {
        String::new()
    };

    let mut prompt = format!(
        "Theme: {theme}\n\nResponses:{listed}{shown}\n\n\
         Provide:\nSUMMARY:\n[summary]\n\nUNIQUE IDEAS:\nIDEA: [idea 1]\nIDEA: [idea 2]\n...\n\n\
         Do not include any # symbols in your response."
    );
    append_language(&mut prompt, "\n", language);
    prompt
}

/// One `## theme` block of the global summary prompt.
fn theme_section(theme: &str, summary: &ThemeSummary) -> String {
    if summary.unique_ideas.is_empty() {
        return format!("## {theme}\n{}\n\n", summary.summary);
    }
    let ideas: String = summary
        .unique_ideas
        .iter()
        .take(GLOBAL_SUMMARY_MAX_IDEAS)
        .map(|idea| format!("- {idea}\n"))
        .collect();
    let hidden = summary.unique_ideas.len().saturating_sub(GLOBAL_SUMMARY_MAX_IDEAS);
    let more = if hidden > 0 {
        format!("(+ {hidden} more ideas)\n")
    } else {
        String::new()
    };
    format!("## {theme}\n{}\nKey ideas:\n{ideas}{more}\n", summary.summary)
}

/// Global summary over the theme summaries, walked in `themes` order.
pub fn global_summary(
    themes: &[String],
    summaries: &BTreeMap<String, ThemeSummary>,
    summary_length: u32,
    language: OutputLanguage,
) -> String {
    let sections: String = themes
        .iter()
        .filter_map(|theme| {
            summaries
                .get(theme)
                .map(|summary| theme_section(theme, summary))
        })
        .collect();
    let mut prompt = format!(
        "Theme summaries from survey responses:\n\n{sections}\
         Create a comprehensive global summary highlighting the most important findings. \
         Length: ~{summary_length} characters."
    );
    append_language(&mut prompt, " ", language);
    prompt
}

/// Single-prompt summary over theme → response texts, walked in `themes` order.
pub fn legacy_summary(
    themes: &[String],
    theme_responses: &BTreeMap<String, Vec<String>>,
    summary_length: u32,
    language: OutputLanguage,
) -> String {
    let sections: String = themes
        .iter()
        .map(|theme| {
            let quoted: String = theme_responses
                .get(theme)
                .into_iter()
                .flatten()
                .take(LEGACY_SUMMARY_MAX_RESPONSES)
                .map(|response| format!("- {}\n", truncate(response, RESPONSE_TRUNCATE_CHARS)))
                .collect();
            format!("Theme: {theme}\n{quoted}\n")
        })
        .collect();
    let mut prompt = format!(
        "Here are the themes and their associated responses:\n\n{sections}\
         \nBased on the above, provide a summary of the main points made in each theme and \
         highlight any unique ideas or problems mentioned. The summary should be approximately \
         {summary_length} characters long."
    );
    append_language(&mut prompt, " ", language);
    prompt
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("short", 300), "short");
        let long = "ä".repeat(301);
        let cut = truncate(&long, 300);
        assert_eq!(cut.chars().count(), 300);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate(&"x".repeat(300), 300).len(), 300);
    }

    #[test]
    fn test_sample_uses_stride() {
        let responses: Vec<String> = (0..120).map(|index| format!("r{index}")).collect();
        let sample = sample_responses(&responses);
        assert_eq!(sample.len(), 50);
        assert_eq!(sample[0], "r0");
        assert_eq!(sample[1], "r2");
        assert_eq!(sample[49], "r98");

        let few = strings(&["a", "b"]);
        assert_eq!(sample_responses(&few), vec!["a", "b"]);
    }

    #[test]
    fn test_identify_prompt_reports_sample_size() {
        let responses: Vec<String> = (0..75).map(|index| format!("answer {index}")).collect();
        let prompt = identify_themes(&responses, OutputLanguage::French);
        assert!(prompt.starts_with("Identify main themes in these 50 survey responses (sample of 75 total)"));
        assert!(prompt.contains("1: answer 0\n"));
        assert!(prompt.ends_with("Respond in French."));
    }

    #[test]
    fn test_batch_prompt_layout() {
        let themes = strings(&["Parking", "Staff"]);
        let prompt = match_batch(&strings(&["no spaces", "rude"]), &themes);
        assert!(prompt.contains("Themes:\n1. Parking\n2. Staff\n\n"));
        assert!(prompt.contains("RESPONSE 1: no spaces\n\nRESPONSE 2: rude\n\n"));
        assert!(!prompt.contains("Respond in"));
    }

    #[test]
    fn test_theme_summary_selects_shortest() {
        let responses: Vec<String> = (0..20).rev().map(|len| "x".repeat(len + 1)).collect();
        let prompt = theme_summary("Parking", &responses, OutputLanguage::English);
        assert!(prompt.contains("(Showing 15 of 20 responses)"));
        assert!(prompt.contains("\n- x\n"));
        assert!(!prompt.contains(&"x".repeat(16)));
        assert!(prompt.ends_with("Do not include any # symbols in your response."));
    }

    #[test]
    fn test_global_summary_caps_ideas_and_follows_theme_order() {
        let themes = strings(&["Staff", "Parking", "Unused"]);
        let mut summaries = BTreeMap::new();
        summaries.insert(
            "Parking".to_owned(),
            ThemeSummary {
                summary: "Not enough spaces.".to_owned(),
                unique_ideas: strings(&["a", "b", "c", "d", "e"]),
            },
        );
        summaries.insert(
            "Staff".to_owned(),
            ThemeSummary {
                summary: "Friendly.".to_owned(),
                unique_ideas: Vec::new(),
            },
        );
        let prompt = global_summary(&themes, &summaries, 400, OutputLanguage::German);
        let staff = prompt.find("## Staff");
        let parking = prompt.find("## Parking");
        assert!(staff < parking);
        assert!(prompt.contains("- c\n(+ 2 more ideas)\n"));
        assert!(!prompt.contains("- d\n"));
        assert!(!prompt.contains("Unused"));
        assert!(prompt.contains("Length: ~400 characters. Respond in German."));
    }

    #[test]
    fn test_legacy_summary_limits_responses() {
        let themes = strings(&["Parking"]);
        let mut theme_responses = BTreeMap::new();
        theme_responses.insert(
            "Parking".to_owned(),
            (0..12).map(|index| format!("resp {index}")).collect::<Vec<_>>(),
        );
        let prompt = legacy_summary(&themes, &theme_responses, 500, OutputLanguage::English);
        assert!(prompt.contains("- resp 9\n"));
        assert!(!prompt.contains("- resp 10\n"));
        assert!(prompt.contains("approximately 500 characters long."));
    }
}
