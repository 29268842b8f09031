//! Action context passed down the change-propagation call chain.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The reason propagation is being computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Publish,
    Unpublish,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Publish => "publish",
            Action::Unpublish => "unpublish",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed action-specific data. New fields go here rather than into an untyped bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionExtensions {
    /// Free-form reason recorded by the trigger (for logs only).
    pub reason: Option<String>,
    /// Operator or subsystem that initiated the change.
    pub initiated_by: Option<String>,
}

/// Immutable context describing one change event.
///
/// Callees receive it by reference and never mutate it; switching the action
/// produces a new value via [`ActionContext::with_action`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionContext {
    action: Action,
    extensions: ActionExtensions,
}

impl ActionContext {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            extensions: ActionExtensions::default(),
        }
    }

    pub fn publish() -> Self {
        Self::new(Action::Publish)
    }

    pub fn unpublish() -> Self {
        Self::new(Action::Unpublish)
    }

    pub fn with_extensions(action: Action, extensions: ActionExtensions) -> Self {
        Self { action, extensions }
    }

    /// Return a copy of this context carrying a different action.
    pub fn with_action(&self, action: Action) -> Self {
        Self {
            action,
            extensions: self.extensions.clone(),
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn extensions(&self) -> &ActionExtensions {
        &self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_action_keeps_extensions() {
        let context = ActionContext::with_extensions(
            Action::Publish,
            ActionExtensions {
                reason: Some("record saved".to_string()),
                initiated_by: Some("editor".to_string()),
            },
        );

        let switched = context.with_action(Action::Unpublish);

        assert_eq!(switched.action(), Action::Unpublish);
        assert_eq!(switched.extensions(), context.extensions());
        assert_eq!(context.action(), Action::Publish);
    }

    #[test]
    fn action_display_is_snake_case() {
        assert_eq!(Action::Publish.to_string(), "publish");
        assert_eq!(Action::Unpublish.to_string(), "unpublish");
    }
}
