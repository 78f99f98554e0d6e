use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::encoder::sanitize;
use crate::error::{TrackerError, TrackerResult};

/// Number of custom variable slots the vendor format supports.
pub const MAX_CUSTOM_VARS: u8 = 5;

/// Combined byte budget for a variable's name and value.
pub const MAX_NAME_VALUE_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Scope {
    Visitor = 1,
    Session = 2,
    #[default]
    Page = 3,
}

impl Scope {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Scope {
    type Error = TrackerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Scope::Visitor),
            2 => Ok(Scope::Session),
            3 => Ok(Scope::Page),
            other => Err(TrackerError::invalid(format!(
                "custom variable scope must be between 1 and 3, got {other}"
            ))),
        }
    }
}

impl From<Scope> for u8 {
    fn from(scope: Scope) -> Self {
        scope.code()
    }
}

/// One active custom variable slot. Name and value are stored sanitized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomVariable {
    pub index: u8,
    pub name: String,
    pub value: String,
    pub scope: Scope,
}

impl CustomVariable {
    /// `index=name=value=scope`, the form kept in the custom-variable cookie.
    pub fn cookie_segment(&self) -> String {
        format!(
            "{}={}={}={}",
            self.index,
            self.name,
            self.value,
            self.scope.code()
        )
    }
}

/// A custom variable segment as read back from an inbound cookie, before
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomVarSegment {
    pub index: Option<u8>,
    pub name: String,
    pub value: String,
    pub scope: Option<u8>,
}

impl CustomVarSegment {
    pub fn render(&self) -> String {
        format!(
            "{}={}={}={}",
            self.index.map(|i| i.to_string()).unwrap_or_default(),
            self.name,
            self.value,
            self.scope.map(|s| s.to_string()).unwrap_or_default()
        )
    }
}

/// The active custom variable slots, in the order they were first set.
///
/// Order matters: the beacon's scope list marks sparse indices relative to
/// each variable's position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomVariables {
    slots: Vec<CustomVariable>,
}

impl CustomVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom variable, returning the index it occupies.
    ///
    /// Without an explicit index the lowest free slot is used. Setting an
    /// occupied index replaces it in place.
    pub fn set(
        &mut self,
        name: &str,
        value: &str,
        scope: Scope,
        index: Option<u8>,
    ) -> TrackerResult<u8> {
        let index = match index {
            Some(index) if (1..=MAX_CUSTOM_VARS).contains(&index) => index,
            Some(index) => {
                return Err(TrackerError::invalid(format!(
                    "custom variable index must be between 1 and {MAX_CUSTOM_VARS}, got {index}"
                )))
            }
            None => self.next_free_index().ok_or_else(|| {
                TrackerError::out_of_range(format!(
                    "cannot add more than {MAX_CUSTOM_VARS} custom variables"
                ))
            })?,
        };

        if name.len() + value.len() > MAX_NAME_VALUE_BYTES {
            return Err(TrackerError::invalid(format!(
                "custom variable name and value exceed the {MAX_NAME_VALUE_BYTES} byte limit"
            )));
        }

        let variable = CustomVariable {
            index,
            name: sanitize(name),
            value: sanitize(value),
            scope,
        };

        match self.slots.iter_mut().find(|slot| slot.index == index) {
            Some(slot) => *slot = variable,
            None => self.slots.push(variable),
        }
        Ok(index)
    }

    /// Remove the variable at `index`, returning whether one was set.
    pub fn delete(&mut self, index: u8) -> bool {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.index != index);
        before != self.slots.len()
    }

    pub fn get(&self, index: u8) -> Option<&CustomVariable> {
        self.slots.iter().find(|slot| slot.index == index)
    }

    /// Value of the variable at `index`.
    pub fn value(&self, index: u8) -> TrackerResult<&str> {
        self.get(index)
            .map(|slot| slot.value.as_str())
            .ok_or_else(|| TrackerError::out_of_range(format!("custom variable {index} has not been set")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CustomVariable> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cookie segments of every variable with the given scope.
    pub fn by_scope(&self, scope: Scope) -> Vec<String> {
        self.slots
            .iter()
            .filter(|slot| slot.scope == scope)
            .map(CustomVariable::cookie_segment)
            .collect()
    }

    /// Fill slots from inbound cookie segments. Indices already set are left
    /// alone; malformed segments are skipped.
    pub fn hydrate(&mut self, segments: &[CustomVarSegment]) {
        for segment in segments {
            let Some(index) = segment.index else {
                debug!(segment = %segment.render(), "skipping custom variable segment without index");
                continue;
            };
            if self.get(index).is_some() {
                continue;
            }
            let scope = match segment.scope.map(Scope::try_from) {
                Some(Ok(scope)) => scope,
                _ => {
                    debug!(index, "skipping custom variable segment with invalid scope");
                    continue;
                }
            };
            if let Err(err) = self.set(&segment.name, &segment.value, scope, Some(index)) {
                debug!(index, error = %err, "skipping invalid custom variable segment");
            }
        }
    }

    fn next_free_index(&self) -> Option<u8> {
        (1..=MAX_CUSTOM_VARS).find(|index| self.get(*index).is_none())
    }
}
