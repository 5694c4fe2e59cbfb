use std::sync::Arc;

use tooloop_core::error::PolicyError;

use super::{InjectionContext, InjectionPolicy, InjectionResult};

/// Ordered list of policies evaluated against the same context.
///
/// Results are merged in order, so the later policy wins ties on a name.
#[derive(Clone, Default)]
pub struct ChainedPolicy {
    policies: Vec<Arc<dyn InjectionPolicy>>,
}

impl ChainedPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, policy: impl InjectionPolicy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn then_shared(mut self, policy: Arc<dyn InjectionPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl InjectionPolicy for ChainedPolicy {
    fn name(&self) -> &str {
        "chain"
    }

    fn evaluate(&self, ctx: &InjectionContext<'_>) -> Result<InjectionResult, PolicyError> {
        let mut merged = InjectionResult::no_change();
        for policy in &self.policies {
            let result = policy.evaluate(ctx)?;
            if !result.is_empty() {
                tracing::trace!(
                    policy = %policy.name(),
                    added = ?result.added_names(),
                    removed = ?result.removed_names(),
                    "chained policy produced changes"
                );
            }
            merged = merged.merge(result);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::policy::FnPolicy;
    use crate::policy::test_support::{leaf, names, record_for};

    #[test]
    fn chain_evaluates_every_policy_against_same_context() {
        let trigger = leaf("trigger");
        let active = vec![trigger.clone()];
        let record = record_for(&trigger, "{}");
        let ctx = InjectionContext {
            conversation: &[],
            active: &active,
            last_turn: &record,
            iteration: 1,
        };

        let chain = ChainedPolicy::new()
            .then(FnPolicy::new("adds_x", |_: &InjectionContext<'_>| {
                Ok(InjectionResult::add([leaf("x")]))
            }))
            .then(FnPolicy::new("checks_x", |ctx: &InjectionContext<'_>| {
                // x from the previous policy is not visible here.
                assert!(!ctx.is_active("x"));
                Ok(InjectionResult::replace(leaf("trigger"), [leaf("y")]))
            }));

        let result = chain.evaluate(&ctx).expect("chain evaluates");
        assert_eq!(chain.len(), 2);
        assert_eq!(names(&result.to_add), vec!["x", "y"]);
        assert_eq!(names(&result.to_remove), vec!["trigger"]);
    }

    #[test]
    fn later_policy_wins_conflicting_definitions() {
        let trigger = leaf("trigger");
        let active = vec![trigger.clone()];
        let record = record_for(&trigger, "{}");
        let ctx = InjectionContext {
            conversation: &[],
            active: &active,
            last_turn: &record,
            iteration: 1,
        };
        let late = leaf("shared");
        let late_for_policy = late.clone();

        let chain = ChainedPolicy::new()
            .then(FnPolicy::new("early", |_: &InjectionContext<'_>| {
                Ok(InjectionResult::add([leaf("shared")]))
            }))
            .then(FnPolicy::new("late", move |_: &InjectionContext<'_>| {
                Ok(InjectionResult::add([late_for_policy.clone()]))
            }));

        let result = chain.evaluate(&ctx).expect("chain evaluates");
        assert_eq!(result.to_add.len(), 1);
        assert!(Arc::ptr_eq(&result.to_add[0], &late));
    }

    #[test]
    fn failing_member_fails_the_chain() {
        let trigger = leaf("trigger");
        let active = vec![trigger.clone()];
        let record = record_for(&trigger, "{}");
        let ctx = InjectionContext {
            conversation: &[],
            active: &active,
            last_turn: &record,
            iteration: 1,
        };

        let chain = ChainedPolicy::new().then(FnPolicy::new(
            "broken",
            |_: &InjectionContext<'_>| Err(PolicyError::new("broken", "bad state")),
        ));

        let err = chain.evaluate(&ctx).expect_err("failure propagates");
        assert_eq!(err.policy, "broken");
    }
}
