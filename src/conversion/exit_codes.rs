use crate::constants::EXIT_CODE_CONTENT_ERROR;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitClass {
    ContentError,
    CommandNotFound,
    NotExecutable,
    Terminated,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitCodeRule {
    pub code: i32,
    pub class: ExitClass,
    pub message: String,
}

impl ExitCodeRule {
    pub fn new(code: i32, class: ExitClass, message: impl Into<String>) -> Self {
        Self {
            code,
            class,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitClassification {
    pub class: ExitClass,
    pub message: String,
}

/// Maps backend exit codes to user-facing diagnoses. First matching rule wins.
#[derive(Debug, Clone)]
pub struct ExitCodeTable {
    rules: Vec<ExitCodeRule>,
}

impl Default for ExitCodeTable {
    fn default() -> Self {
        Self::new(vec![
            ExitCodeRule::new(
                EXIT_CODE_CONTENT_ERROR,
                ExitClass::ContentError,
                "The spreadsheet does not have the expected layout and could not be processed.",
            ),
            ExitCodeRule::new(
                126,
                ExitClass::NotExecutable,
                "The conversion backend could not be executed (permission denied).",
            ),
            ExitCodeRule::new(
                127,
                ExitClass::CommandNotFound,
                "The conversion backend or its interpreter was not found.",
            ),
            // cmd.exe: "is not recognized as an internal or external command"
            ExitCodeRule::new(
                9009,
                ExitClass::CommandNotFound,
                "The conversion backend or its interpreter was not found.",
            ),
        ])
    }
}

impl ExitCodeTable {
    pub fn new(rules: Vec<ExitCodeRule>) -> Self {
        Self { rules }
    }

    /// Adds rules ahead of the existing ones so they can shadow defaults.
    pub fn with_rules(mut self, extra: impl IntoIterator<Item = ExitCodeRule>) -> Self {
        let mut rules: Vec<ExitCodeRule> = extra.into_iter().collect();
        rules.append(&mut self.rules);
        self.rules = rules;
        self
    }

    pub fn classify(&self, code: Option<i32>) -> ExitClassification {
        let Some(code) = code else {
            return ExitClassification {
                class: ExitClass::Terminated,
                message: "The conversion backend was terminated before it finished.".to_string(),
            };
        };

        match self.rules.iter().find(|rule| rule.code == code) {
            Some(rule) => ExitClassification {
                class: rule.class,
                message: rule.message.clone(),
            },
            None => ExitClassification {
                class: ExitClass::Failure,
                message: format!("Conversion failed: backend exited with code {}.", code),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_error_is_distinct_from_generic_failure() {
        let table = ExitCodeTable::default();
        let content = table.classify(Some(EXIT_CODE_CONTENT_ERROR));
        let generic = table.classify(Some(1));

        assert_eq!(content.class, ExitClass::ContentError);
        assert_eq!(generic.class, ExitClass::Failure);
        assert_ne!(content.message, generic.message);
    }

    #[test]
    fn unknown_codes_mention_the_raw_code() {
        let classification = ExitCodeTable::default().classify(Some(42));

        assert_eq!(classification.class, ExitClass::Failure);
        assert!(classification.message.contains("42"));
    }

    #[test]
    fn missing_code_means_terminated() {
        assert_eq!(
            ExitCodeTable::default().classify(None).class,
            ExitClass::Terminated
        );
    }

    #[test]
    fn extra_rules_shadow_defaults() {
        let table = ExitCodeTable::default().with_rules([ExitCodeRule::new(
            2,
            ExitClass::Failure,
            "Sheet 'Cartera' is missing",
        )]);

        let classification = table.classify(Some(2));
        assert_eq!(classification.class, ExitClass::Failure);
        assert_eq!(classification.message, "Sheet 'Cartera' is missing");
        assert_eq!(
            table.classify(Some(9009)).class,
            ExitClass::CommandNotFound
        );
    }
}
