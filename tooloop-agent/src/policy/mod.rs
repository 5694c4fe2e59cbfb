//! Injection policies: rules that add or remove capabilities from the active set after each turn.

mod chain;
mod disclosure;

use std::fmt;

use tooloop_core::capability::CapabilityRef;
use tooloop_core::error::PolicyError;
use tooloop_core::transcript::ChatMessage;
use tooloop_core::turn::TurnRecord;

pub use chain::ChainedPolicy;
pub use disclosure::DisclosurePolicy;

/// Immutable snapshot handed to a policy for one turn record.
#[derive(Debug, Clone, Copy)]
pub struct InjectionContext<'a> {
    pub conversation: &'a [ChatMessage],
    pub active: &'a [CapabilityRef],
    pub last_turn: &'a TurnRecord,
    pub iteration: u32,
}

impl InjectionContext<'_> {
    pub fn is_active(&self, name: &str) -> bool {
        self.active.iter().any(|c| c.name() == name)
    }

    pub fn active_named(&self, name: &str) -> Option<&CapabilityRef> {
        self.active.iter().find(|c| c.name() == name)
    }
}

/// Additions and removals computed by a policy. Empty on both sides means no change.
#[derive(Clone, Default)]
pub struct InjectionResult {
    pub to_add: Vec<CapabilityRef>,
    pub to_remove: Vec<CapabilityRef>,
}

impl InjectionResult {
    pub fn no_change() -> Self {
        Self::default()
    }

    pub fn add(capabilities: impl IntoIterator<Item = CapabilityRef>) -> Self {
        Self {
            to_add: capabilities.into_iter().collect(),
            to_remove: Vec::new(),
        }
    }

    pub fn remove(capabilities: impl IntoIterator<Item = CapabilityRef>) -> Self {
        Self {
            to_add: Vec::new(),
            to_remove: capabilities.into_iter().collect(),
        }
    }

    pub fn replace(old: CapabilityRef, news: impl IntoIterator<Item = CapabilityRef>) -> Self {
        Self {
            to_add: news.into_iter().collect(),
            to_remove: vec![old],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Merge `later` into `self`.
    ///
    /// Additions and removals are unioned by name. When both sides add the same
    /// name, the later definition wins. A name present in both lists is removed
    /// first and then added when the result is applied.
    pub fn merge(mut self, later: InjectionResult) -> Self {
        for capability in later.to_add {
            self.to_add.retain(|existing| existing.name() != capability.name());
            self.to_add.push(capability);
        }
        for capability in later.to_remove {
            if !self.to_remove.iter().any(|existing| existing.name() == capability.name()) {
                self.to_remove.push(capability);
            }
        }
        self
    }

    pub fn added_names(&self) -> Vec<&str> {
        self.to_add.iter().map(|c| c.name()).collect()
    }

    pub fn removed_names(&self) -> Vec<&str> {
        self.to_remove.iter().map(|c| c.name()).collect()
    }
}

impl fmt::Debug for InjectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionResult")
            .field("to_add", &self.added_names())
            .field("to_remove", &self.removed_names())
            .finish()
    }
}

/// Computes active-set changes after a turn.
///
/// Must be pure. An error is fatal for the run.
pub trait InjectionPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, ctx: &InjectionContext<'_>) -> Result<InjectionResult, PolicyError>;
}

/// Neutral policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChangePolicy;

impl InjectionPolicy for NoChangePolicy {
    fn name(&self) -> &str {
        "no_change"
    }

    fn evaluate(&self, _ctx: &InjectionContext<'_>) -> Result<InjectionResult, PolicyError> {
        Ok(InjectionResult::no_change())
    }
}

/// Closure-backed policy.
pub struct FnPolicy<F> {
    name: String,
    evaluate: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(&InjectionContext<'_>) -> Result<InjectionResult, PolicyError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, evaluate: F) -> Self {
        Self {
            name: name.into(),
            evaluate,
        }
    }
}

impl<F> InjectionPolicy for FnPolicy<F>
where
    F: Fn(&InjectionContext<'_>) -> Result<InjectionResult, PolicyError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &InjectionContext<'_>) -> Result<InjectionResult, PolicyError> {
        (self.evaluate)(ctx)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use tooloop_core::capability::{CapabilityRef, CapabilityResult, FnCapability};
    use tooloop_core::transcript::CapabilityCall;
    use tooloop_core::turn::TurnRecord;

    pub fn leaf(name: &str) -> CapabilityRef {
        FnCapability::constant(name, format!("{name} capability"), format!("{name} ok")).into_ref()
    }

    pub fn record_for(capability: &CapabilityRef, input: &str) -> TurnRecord {
        let call = CapabilityCall::new("call-1", capability.name(), input);
        TurnRecord::new(
            &call,
            Some(capability.clone()),
            CapabilityResult::text("ok"),
            1,
        )
    }

    pub fn names(caps: &[CapabilityRef]) -> Vec<&str> {
        caps.iter().map(|c| c.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{leaf, names, record_for};
    use super::*;

    #[test]
    fn merge_unions_and_later_addition_wins() {
        let first_a = leaf("a");
        let second_a = leaf("a");
        let merged = InjectionResult::add([first_a, leaf("b")])
            .merge(InjectionResult::add([second_a.clone()]))
            .merge(InjectionResult::remove([leaf("c"), leaf("c")]));

        assert_eq!(merged.added_names(), vec!["b", "a"]);
        assert!(std::sync::Arc::ptr_eq(&merged.to_add[1], &second_a));
        assert_eq!(merged.removed_names(), vec!["c"]);
    }

    #[test]
    fn replace_builds_remove_and_add() {
        let result = InjectionResult::replace(leaf("old"), [leaf("new1"), leaf("new2")]);
        assert_eq!(result.removed_names(), vec!["old"]);
        assert_eq!(result.added_names(), vec!["new1", "new2"]);
        assert!(!result.is_empty());
        assert!(InjectionResult::no_change().is_empty());
    }

    #[test]
    fn fn_policy_sees_context() {
        let search = leaf("search");
        let active = vec![search.clone()];
        let record = record_for(&search, "{}");
        let ctx = InjectionContext {
            conversation: &[],
            active: &active,
            last_turn: &record,
            iteration: 3,
        };

        let policy = FnPolicy::new("late_tools", |ctx: &InjectionContext<'_>| {
            if ctx.iteration >= 3 && !ctx.is_active("summarize") {
                Ok(InjectionResult::add([leaf("summarize")]))
            } else {
                Ok(InjectionResult::no_change())
            }
        });

        let result = policy.evaluate(&ctx).expect("policy evaluates");
        assert_eq!(names(&result.to_add), vec!["summarize"]);
        assert_eq!(policy.name(), "late_tools");
        assert!(NoChangePolicy.evaluate(&ctx).expect("no change").is_empty());
    }
}
