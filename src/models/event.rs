use serde::{Deserialize, Serialize};

/// An interaction reported alongside (or instead of) a page view.
///
/// Category and action are optional at the type level so that callers
/// relaying untrusted input get a validation error rather than a panic;
/// the encoder requires both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub category: Option<String>,
    pub action: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub non_interaction: bool,
}

impl Event {
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            action: Some(action.into()),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn non_interactive(mut self) -> Self {
        self.non_interaction = true;
        self
    }
}
