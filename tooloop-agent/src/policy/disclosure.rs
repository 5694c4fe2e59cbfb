use tooloop_core::config::DisclosureConfig;
use tooloop_core::error::PolicyError;

use super::{InjectionContext, InjectionPolicy, InjectionResult};

/// Turns the invocation of a disclosure node into an unfold of its selected children.
#[derive(Debug, Clone)]
pub struct DisclosurePolicy {
    context_capability: bool,
}

impl Default for DisclosurePolicy {
    fn default() -> Self {
        Self {
            context_capability: true,
        }
    }
}

impl DisclosurePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DisclosureConfig) -> Self {
        Self {
            context_capability: config.context_capability,
        }
    }

    /// Unfold children without the synthetic `<node>_context` capability.
    pub fn without_context(mut self) -> Self {
        self.context_capability = false;
        self
    }
}

impl InjectionPolicy for DisclosurePolicy {
    fn name(&self) -> &str {
        "disclosure"
    }

    fn evaluate(&self, ctx: &InjectionContext<'_>) -> Result<InjectionResult, PolicyError> {
        let turn = ctx.last_turn;
        let Some(capability) = &turn.capability else {
            return Ok(InjectionResult::no_change());
        };
        let Some(node) = capability.as_disclosure() else {
            return Ok(InjectionResult::no_change());
        };
        if turn.is_error() {
            return Ok(InjectionResult::no_change());
        }

        let selected = node.select(&turn.raw_input);
        let mut result = InjectionResult::no_change();
        if node.remove_on_invoke() {
            result.to_remove.push(capability.clone());
        }

        if !selected.is_empty() {
            if self.context_capability {
                // A kept node may unfold again; refresh its context instead of keeping a stale one.
                let context_name = node.context_name();
                if let Some(previous) = ctx.active_named(&context_name) {
                    result.to_remove.push(previous.clone());
                }
                result.to_add.extend(selected.iter().cloned());
                result.to_add.push(node.context_capability(&selected));
            } else {
                result.to_add.extend(selected.iter().cloned());
            }
        }

        tracing::debug!(
            node = %capability.name(),
            iteration = ctx.iteration,
            added = ?result.added_names(),
            removed = ?result.removed_names(),
            "disclosure node unfolded"
        );
        Ok(result)
    }
}
