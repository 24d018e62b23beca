//! Trigger classification: decide whether an inbound message starts a capture.
//!
//! Two message shapes qualify. A deck code is pasted with a fixed prefix; a
//! deck list is recognised purely by the number of `/` separators it
//! contains. The count is an exact match, so a list missing one entry (or
//! carrying one extra) is deliberately ignored.

use serde::{Deserialize, Serialize};

/// Which of the two recognised shapes a message has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerCategory {
    /// Message starts with the code prefix.
    CodeForm,
    /// Message contains exactly the expected number of delimiters.
    ListForm,
}

impl TriggerCategory {
    /// The text written to the label cell for this category.
    pub fn label(self) -> &'static str {
        match self {
            TriggerCategory::CodeForm => "デッキコード",
            TriggerCategory::ListForm => "デッキリスト",
        }
    }
}

/// The literal patterns a message is matched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRules {
    /// Prefix marking a code-form message. Default: `KCG-`.
    pub code_prefix: String,
    /// Character counted for list-form detection. Default: `/`.
    pub list_delimiter: char,
    /// Exact delimiter count for list-form detection. Default: 59.
    pub list_delimiter_count: usize,
}

impl Default for TriggerRules {
    fn default() -> Self {
        Self {
            code_prefix: "KCG-".to_string(),
            list_delimiter: '/',
            list_delimiter_count: 59,
        }
    }
}

impl TriggerRules {
    /// Classify `text`; `None` means the message is not a trigger.
    ///
    /// The code prefix wins over the delimiter count when both match.
    pub fn classify(&self, text: &str) -> Option<TriggerCategory> {
        if text.starts_with(&self.code_prefix) {
            return Some(TriggerCategory::CodeForm);
        }
        let count = text.chars().filter(|&c| c == self.list_delimiter).count();
        (count == self.list_delimiter_count).then_some(TriggerCategory::ListForm)
    }
}

/// Classify with the default rules.
pub fn classify(text: &str) -> Option<TriggerCategory> {
    TriggerRules::default().classify(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slashes(n: usize) -> String {
        (0..n).map(|i| format!("card{i}/")).collect()
    }

    #[test]
    fn prefix_is_code_form() {
        assert_eq!(classify("KCG-ABCDEF"), Some(TriggerCategory::CodeForm));
        assert_eq!(classify("KCG-"), Some(TriggerCategory::CodeForm));
    }

    #[test]
    fn prefix_wins_regardless_of_delimiters() {
        for n in [0, 58, 59, 60] {
            let text = format!("KCG-{}", slashes(n));
            assert_eq!(classify(&text), Some(TriggerCategory::CodeForm), "n={n}");
        }
    }

    #[test]
    fn exact_count_is_list_form() {
        assert_eq!(classify(&slashes(59)), Some(TriggerCategory::ListForm));
    }

    #[test]
    fn off_by_one_counts_are_ignored() {
        assert_eq!(classify(&slashes(58)), None);
        assert_eq!(classify(&slashes(60)), None);
    }

    #[test]
    fn prefix_must_be_at_start() {
        assert_eq!(classify(" KCG-ABC"), None);
        assert_eq!(classify("kcg-abc"), None);
        assert_eq!(classify("see KCG-ABC"), None);
    }

    #[test]
    fn plain_chat_is_ignored() {
        assert_eq!(classify(""), None);
        assert_eq!(classify("hello / world"), None);
    }

    #[test]
    fn labels_differ_per_category() {
        assert_eq!(TriggerCategory::CodeForm.label(), "デッキコード");
        assert_eq!(TriggerCategory::ListForm.label(), "デッキリスト");
    }

    #[test]
    fn custom_rules() {
        let rules = TriggerRules {
            code_prefix: "#".into(),
            list_delimiter: ',',
            list_delimiter_count: 2,
        };
        assert_eq!(rules.classify("#x"), Some(TriggerCategory::CodeForm));
        assert_eq!(rules.classify("a,b,c"), Some(TriggerCategory::ListForm));
        assert_eq!(rules.classify("a,b"), None);
    }
}
