use regex::Regex;
use std::sync::LazyLock;

// "<word> Act", e.g. "Theft Act". The trailing boundary keeps "the Action" out.
static ACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\w+ Act\b").expect("act pattern is valid"));

static SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Section \d+").expect("section pattern is valid"));

/// Citations found on a single line, in match order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineCitations<'a> {
    pub acts: Vec<&'a str>,
    pub sections: Vec<&'a str>,
}

impl LineCitations<'_> {
    pub fn is_empty(&self) -> bool {
        self.acts.is_empty() && self.sections.is_empty()
    }
}

/// Find every Act and Section citation on one line.
pub fn scan_line(line: &str) -> LineCitations<'_> {
    LineCitations {
        acts: ACT.find_iter(line).map(|m| m.as_str().trim()).collect(),
        sections: SECTION.find_iter(line).map(|m| m.as_str().trim()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_act_and_section() {
        let found = scan_line("The Theft Act covers Section 379");
        assert_eq!(found.acts, vec!["Theft Act"]);
        assert_eq!(found.sections, vec!["Section 379"]);
    }

    #[test]
    fn test_case_insensitive() {
        let found = scan_line("under the evidence act, see SECTION 65 and section 65B");
        assert_eq!(found.acts, vec!["evidence act"]);
        assert_eq!(found.sections, vec!["SECTION 65", "section 65"]);
    }

    #[test]
    fn test_act_must_be_a_whole_word() {
        let found = scan_line("The Action was dismissed");
        assert!(found.acts.is_empty());
    }

    #[test]
    fn test_section_requires_digits() {
        let found = scan_line("See Section A and Sections 4");
        assert!(found.sections.is_empty());
    }

    #[test]
    fn test_only_preceding_word_is_captured() {
        let found = scan_line("Indian Penal Code Act 1860");
        assert_eq!(found.acts, vec!["Code Act"]);
    }

    #[test]
    fn test_multiple_acts_per_line() {
        let found = scan_line("Companies Act and Arbitration Act both apply");
        assert_eq!(found.acts, vec!["Companies Act", "Arbitration Act"]);
        assert!(!found.is_empty());
    }
}
