//! Parsers for the line-oriented answers the prompts ask for.
//!
//! All of them are permissive: anything that does not fit the expected line
//! shape is skipped rather than reported.

use survey_core::ThemeSummary;

const SUMMARY_MARKER: &str = "SUMMARY:";
const IDEAS_MARKER: &str = "UNIQUE IDEAS:";
const RESPONSE_PREFIX: &str = "RESPONSE ";

/// Leading decimal number of `text`, ignoring surrounding brackets and spaces.
fn leading_number(text: &str) -> Option<usize> {
    let trimmed = text.trim().trim_start_matches('[');
    let end = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

/// Items of a dash-bulleted list.
pub fn dash_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix('-'))
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Numbers at the start of each item of a dash-bulleted list.
pub fn dash_numbers(text: &str) -> Vec<usize> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix('-'))
        .filter_map(leading_number)
        .collect()
}

/// Maps 1-based theme numbers to theme names, dropping anything out of range.
pub fn numbers_to_themes(numbers: &[usize], themes: &[String]) -> Vec<String> {
    numbers
        .iter()
        .filter_map(|number| number.checked_sub(1).and_then(|index| themes.get(index)))
        .cloned()
        .collect()
}

/// Positional theme assignments from a `RESPONSE <n>: <numbers>` answer.
///
/// The result always has `response_count` entries; a response whose line is
/// missing or unusable gets no themes.
pub fn batch_assignments(text: &str, response_count: usize, themes: &[String]) -> Vec<Vec<String>> {
    let mut results = vec![Vec::new(); response_count];

    for line in text.lines() {
        let Some(rest) = line.trim().strip_prefix(RESPONSE_PREFIX) else {
            continue;
        };
        let Some((number, assigned)) = rest.split_once(':') else {
            continue;
        };
        let Some(position) = leading_number(number)
            .and_then(|parsed| parsed.checked_sub(1))
            .filter(|position| *position < response_count)
        else {
            continue;
        };

        let compact: String = assigned.chars().filter(|ch| *ch != ' ').collect();
        let numbers: Vec<usize> = compact.split(',').filter_map(leading_number).collect();
        results[position] = numbers_to_themes(&numbers, themes);
    }

    results
}

/// Splits a theme summary answer into the summary and its unique ideas.
pub fn summary_and_ideas(text: &str) -> ThemeSummary {
    let cleaned = text
        .replace("# SUMMARY:", SUMMARY_MARKER)
        .replace("#SUMMARY:", SUMMARY_MARKER)
        .replace("# UNIQUE IDEAS:", IDEAS_MARKER)
        .replace("#UNIQUE IDEAS:", IDEAS_MARKER)
        .replace('#', "");

    let mut sections = cleaned.split(IDEAS_MARKER);
    let head = sections.next().unwrap_or_default();
    let Some(ideas_section) = sections.next() else {
        return ThemeSummary {
            summary: cleaned.trim().to_owned(),
            unique_ideas: Vec::new(),
        };
    };

    let head = head.trim();
    let summary = head.strip_prefix(SUMMARY_MARKER).map_or(head, str::trim);

    let unique_ideas = ideas_section
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            line.strip_prefix("IDEA: ")
                .or_else(|| line.strip_prefix("- "))
        })
        .filter(|idea| !idea.is_empty())
        .map(str::to_owned)
        .collect();

    ThemeSummary {
        summary: summary.to_owned(),
        unique_ideas,
    }
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;

    fn themes() -> Vec<String> {
        ["Parking", "Staff", "Cost"]
            .iter()
            .map(|theme| (*theme).to_owned())
            .collect()
    }

    #[test]
    fn test_summary_and_ideas_example() {
        let parsed = summary_and_ideas("SUMMARY:\nFoo bar.\n\nUNIQUE IDEAS:\nIDEA: one\n- two\n");
        assert_eq!(parsed.summary, "Foo bar.");
        assert_eq!(parsed.unique_ideas, vec!["one", "two"]);
    }

    #[test]
    fn test_summary_strips_header_markup() {
        let parsed = summary_and_ideas("# SUMMARY:\n## Mostly positive\n#UNIQUE IDEAS:\n- valet parking");
        assert_eq!(parsed.summary, "Mostly positive");
        assert_eq!(parsed.unique_ideas, vec!["valet parking"]);
    }

    #[test]
    fn test_summary_without_marker() {
        let parsed = summary_and_ideas("  SUMMARY: just prose\n");
        assert_eq!(parsed.summary, "SUMMARY: just prose");
        assert!(parsed.unique_ideas.is_empty());
    }

    #[test]
    fn test_dash_list() {
        let parsed = dash_list("Here are the themes:\n- Parking\n  -  Staff friendliness \n-\n* ignored");
        assert_eq!(parsed, vec!["Parking", "Staff friendliness"]);
    }

    #[test]
    fn test_dash_numbers_and_mapping() {
        let numbers = dash_numbers("- 1\n- 3. Cost\n- seven\n- 9");
        assert_eq!(numbers, vec![1, 3, 9]);
        assert_eq!(numbers_to_themes(&numbers, &themes()), vec!["Parking", "Cost"]);
    }

    #[test]
    fn test_batch_assignments() {
        let answer = "Sure.\nRESPONSE 1: 1, 3\n  RESPONSE 3: [2]\nRESPONSE 4: 1\nRESPONSE x: 2\nRESPONSE 2 no colon";
        let parsed = batch_assignments(answer, 3, &themes());
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], vec!["Parking", "Cost"]);
        assert!(parsed[1].is_empty());
        assert_eq!(parsed[2], vec!["Staff"]);
    }

    #[test]
    fn test_batch_assignments_out_of_range_themes() {
        let parsed = batch_assignments("RESPONSE 1: 0, 4, 2", 1, &themes());
        assert_eq!(parsed[0], vec!["Staff"]);
    }
}
