//! # Update Options
//!
//! Runtime options consulted by the pending update list. They are set once on
//! a database through `DatabaseBuilder` and copied into every pending list the
//! database opens.
//!
//! | Option        | Default                     | Description                                  |
//! |---------------|-----------------------------|----------------------------------------------|
//! | merge_texts   | true                        | Merge adjacent text siblings after apply     |
//! | not_found     | ignore idempotent, fail rest| What to do when a target no longer resolves  |
//!
//! ## Not-Found Policy
//!
//! A target can disappear between request and application: a position past
//! the end of the store, a document deleted earlier in the same snapshot, or a
//! node identifier that no longer resolves. Idempotent kinds (node deletes,
//! resource deletes, resource renames) treat this as a silent no-op, every
//! other kind treats it as fatal. Both halves are explicit settings so the
//! asymmetry can be changed per database instead of being baked in.

use crate::update::UpdateKind;

/// Reaction to a target that no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissing {
    Ignore,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFoundPolicy {
    /// Applies to kinds for which a second application is harmless.
    pub idempotent: OnMissing,
    /// Applies to every other kind.
    pub strict: OnMissing,
}

impl NotFoundPolicy {
    pub fn for_kind(&self, kind: UpdateKind) -> OnMissing {
        if kind.is_idempotent() {
            self.idempotent
        } else {
            self.strict
        }
    }
}

impl Default for NotFoundPolicy {
    fn default() -> Self {
        Self {
            idempotent: OnMissing::Ignore,
            strict: OnMissing::Fail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    pub merge_texts: bool,
    pub not_found: NotFoundPolicy,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            merge_texts: true,
            not_found: NotFoundPolicy::default(),
        }
    }
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_texts(mut self, enabled: bool) -> Self {
        self.merge_texts = enabled;
        self
    }

    pub fn not_found(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_asymmetric() {
        let policy = NotFoundPolicy::default();

        assert_eq!(policy.for_kind(UpdateKind::Delete), OnMissing::Ignore);
        assert_eq!(policy.for_kind(UpdateKind::DeleteResource), OnMissing::Ignore);
        assert_eq!(policy.for_kind(UpdateKind::Put), OnMissing::Fail);
        assert_eq!(policy.for_kind(UpdateKind::ReplaceNode), OnMissing::Fail);
    }

    #[test]
    fn strict_policy_applies_to_idempotent_kinds_too() {
        let policy = NotFoundPolicy {
            idempotent: OnMissing::Fail,
            strict: OnMissing::Fail,
        };

        assert_eq!(policy.for_kind(UpdateKind::Delete), OnMissing::Fail);
    }

    #[test]
    fn options_setters_chain() {
        let options = UpdateOptions::new().merge_texts(false);

        assert!(!options.merge_texts);
        assert_eq!(options.not_found, NotFoundPolicy::default());
    }
}
