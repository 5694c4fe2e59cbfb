//! Disclosure nodes: capabilities that fold a catalog of inner capabilities
//! and unfold a selected subset when the model invokes them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::{
    CallContext, Capability, CapabilityDescriptor, CapabilityRef, CapabilityResult, parse_input,
};
use crate::error::CapabilityError;

/// Input field read by [`CategorySelector`].
pub const CATEGORY_FIELD: &str = "category";

/// Picks which inner capabilities a node reveals for a given invocation input.
///
/// Must be deterministic: identical input selects the identical subset.
pub trait Selector: Send + Sync {
    fn select(&self, input: &str, inner: &[CapabilityRef]) -> Vec<CapabilityRef>;

    /// Input schema advertised by the owning node.
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
}

/// Reveals every inner capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectAll;

impl Selector for SelectAll {
    fn select(&self, _input: &str, inner: &[CapabilityRef]) -> Vec<CapabilityRef> {
        inner.to_vec()
    }
}

/// Closure-backed selector.
pub struct FnSelector<F> {
    select: F,
}

impl<F> FnSelector<F>
where
    F: Fn(&str, &[CapabilityRef]) -> Vec<CapabilityRef> + Send + Sync,
{
    pub fn new(select: F) -> Self {
        Self { select }
    }
}

impl<F> Selector for FnSelector<F>
where
    F: Fn(&str, &[CapabilityRef]) -> Vec<CapabilityRef> + Send + Sync,
{
    fn select(&self, input: &str, inner: &[CapabilityRef]) -> Vec<CapabilityRef> {
        (self.select)(input, inner)
    }
}

/// Selects by the `category` input field.
///
/// A missing field or an unknown category reveals everything, so a model that
/// skips the optional filter still makes progress.
#[derive(Debug, Clone, Default)]
pub struct CategorySelector {
    categories: BTreeMap<String, Vec<String>>,
}

impl CategorySelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category<I, S>(mut self, category: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories
            .insert(category.into(), members.into_iter().map(Into::into).collect());
        self
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }
}

impl Selector for CategorySelector {
    fn select(&self, input: &str, inner: &[CapabilityRef]) -> Vec<CapabilityRef> {
        let parsed = parse_input(input);
        let members = parsed
            .get(CATEGORY_FIELD)
            .and_then(serde_json::Value::as_str)
            .and_then(|category| self.categories.get(category));

        match members {
            Some(members) => inner
                .iter()
                .filter(|capability| members.iter().any(|name| name == capability.name()))
                .cloned()
                .collect(),
            None => inner.to_vec(),
        }
    }

    fn input_schema(&self) -> serde_json::Value {
        let categories: Vec<&str> = self.categories().collect();
        serde_json::json!({
            "type": "object",
            "properties": {
                CATEGORY_FIELD: {
                    "type": "string",
                    "enum": categories,
                    "description": "Optional category filter; omit to reveal everything."
                }
            }
        })
    }
}

/// A capability wrapping a folded collection of inner capabilities.
#[derive(Clone)]
pub struct DisclosureNode {
    name: String,
    description: String,
    inner: Vec<CapabilityRef>,
    selector: Arc<dyn Selector>,
    remove_on_invoke: bool,
    usage_notes: Option<String>,
}

impl DisclosureNode {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        inner: Vec<CapabilityRef>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            inner,
            selector: Arc::new(SelectAll),
            remove_on_invoke: true,
            usage_notes: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Selector + 'static) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    /// Keep the node invocable after it unfolds.
    pub fn keep_on_invoke(mut self) -> Self {
        self.remove_on_invoke = false;
        self
    }

    pub fn with_usage_notes(mut self, notes: impl Into<String>) -> Self {
        self.usage_notes = Some(notes.into());
        self
    }

    pub fn into_ref(self) -> CapabilityRef {
        Arc::new(self)
    }

    pub fn inner(&self) -> &[CapabilityRef] {
        &self.inner
    }

    pub fn remove_on_invoke(&self) -> bool {
        self.remove_on_invoke
    }

    pub fn usage_notes(&self) -> Option<&str> {
        self.usage_notes.as_deref()
    }

    /// Inner capabilities revealed for `input`.
    pub fn select(&self, input: &str) -> Vec<CapabilityRef> {
        self.selector.select(input, &self.inner)
    }

    pub fn context_name(&self) -> String {
        format!("{}_context", self.name)
    }

    /// Synthetic capability carrying guidance for the children just unfolded.
    pub fn context_capability(&self, selected: &[CapabilityRef]) -> CapabilityRef {
        Arc::new(DisclosureContext {
            name: self.context_name(),
            description: context_description(self, selected),
            parent: self.name.clone(),
            parent_description: self.description.clone(),
            children: selected
                .iter()
                .map(|child| CapabilityDescriptor::of(child.as_ref()))
                .collect(),
            usage_notes: self.usage_notes.clone(),
        })
    }
}

impl fmt::Debug for DisclosureNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner: Vec<&str> = self.inner.iter().map(|c| c.name()).collect();
        f.debug_struct("DisclosureNode")
            .field("name", &self.name)
            .field("inner", &inner)
            .field("remove_on_invoke", &self.remove_on_invoke)
            .field("usage_notes", &self.usage_notes)
            .finish()
    }
}

#[async_trait]
impl Capability for DisclosureNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.selector.input_schema()
    }

    async fn call(
        &self,
        input: &str,
        ctx: &CallContext,
    ) -> Result<CapabilityResult, CapabilityError> {
        let selected = self.select(input);
        tracing::debug!(
            node = %self.name,
            call_id = %ctx.call_id,
            selected = selected.len(),
            inner = self.inner.len(),
            "disclosure node invoked"
        );

        if selected.is_empty() {
            return Ok(CapabilityResult::text(format!(
                "No capabilities were unfolded from '{}'.",
                self.name
            )));
        }

        let names: Vec<&str> = selected.iter().map(|c| c.name()).collect();
        Ok(CapabilityResult::text(format!(
            "Unfolded {} capabilities from '{}': {}.",
            selected.len(),
            self.name,
            names.join(", ")
        )))
    }

    fn as_disclosure(&self) -> Option<&DisclosureNode> {
        Some(self)
    }
}

fn context_description(node: &DisclosureNode, selected: &[CapabilityRef]) -> String {
    let children: Vec<String> = selected
        .iter()
        .map(|child| format!("{} ({})", child.name(), first_line(child.description())))
        .collect();
    format!(
        "Guidance for capabilities unfolded from '{}': {}. Available: {}.",
        node.name,
        first_line(&node.description),
        children.join("; ")
    )
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

/// Context capability created on unfold. Answers with full detail on the children.
struct DisclosureContext {
    name: String,
    description: String,
    parent: String,
    parent_description: String,
    children: Vec<CapabilityDescriptor>,
    usage_notes: Option<String>,
}

impl DisclosureContext {
    fn detail(&self) -> String {
        let mut out = format!("# {}\n{}\n", self.parent, self.parent_description);
        for child in &self.children {
            out.push_str(&format!(
                "\n## {}\n{}\nInput schema: {}\n",
                child.name, child.description, child.input_schema
            ));
        }
        if let Some(notes) = &self.usage_notes {
            out.push_str(&format!("\n## Usage notes\n{notes}\n"));
        }
        out
    }
}

#[async_trait]
impl Capability for DisclosureContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(
        &self,
        _input: &str,
        _ctx: &CallContext,
    ) -> Result<CapabilityResult, CapabilityError> {
        Ok(CapabilityResult::text(self.detail()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FnCapability;

    fn leaf(name: &str) -> CapabilityRef {
        FnCapability::constant(name, format!("{name} leaf\nsecond line"), "ok").into_ref()
    }

    fn names(caps: &[CapabilityRef]) -> Vec<&str> {
        caps.iter().map(|c| c.name()).collect()
    }

    #[test]
    fn default_selector_reveals_everything() {
        let node = DisclosureNode::new("files", "File access", vec![leaf("read"), leaf("write")]);
        assert!(node.remove_on_invoke());
        assert_eq!(names(&node.select("{}")), vec!["read", "write"]);
    }

    #[test]
    fn category_selector_filters_and_falls_back() {
        let node = DisclosureNode::new(
            "files",
            "File access",
            vec![leaf("read"), leaf("write"), leaf("delete")],
        )
        .with_selector(
            CategorySelector::new()
                .with_category("readonly", ["read"])
                .with_category("mutating", ["write", "delete"]),
        );

        assert_eq!(names(&node.select(r#"{"category":"readonly"}"#)), vec!["read"]);
        assert_eq!(
            names(&node.select(r#"{"category":"mutating"}"#)),
            vec!["write", "delete"]
        );
        assert_eq!(node.select(r#"{"category":"unknown"}"#).len(), 3);
        assert_eq!(node.select("").len(), 3);
        assert_eq!(node.select("not json").len(), 3);
    }

    #[test]
    fn category_selector_advertises_categories() {
        let selector = CategorySelector::new()
            .with_category("b", ["x"])
            .with_category("a", ["y"]);
        let schema = selector.input_schema();
        assert_eq!(
            schema["properties"]["category"]["enum"],
            serde_json::json!(["a", "b"])
        );
    }

    #[tokio::test]
    async fn node_call_summarizes_unfold() {
        let node = DisclosureNode::new("database", "Database access", vec![leaf("query")]);
        let result = node
            .call("{}", &CallContext::detached("call-1"))
            .await
            .expect("node call succeeds");
        let CapabilityResult::Text { content } = result else {
            panic!("expected text result");
        };
        assert_eq!(content, "Unfolded 1 capabilities from 'database': query.");
    }

    #[tokio::test]
    async fn empty_selection_reports_nothing_unfolded() {
        let node = DisclosureNode::new("database", "Database access", vec![leaf("query")])
            .with_selector(FnSelector::new(|_: &str, _: &[CapabilityRef]| Vec::new()));
        let result = node
            .call("{}", &CallContext::detached("call-1"))
            .await
            .expect("node call succeeds");
        assert_eq!(
            result,
            CapabilityResult::text("No capabilities were unfolded from 'database'.")
        );
    }

    #[tokio::test]
    async fn context_capability_returns_children_and_usage_notes() {
        let node = DisclosureNode::new("database", "Database access", vec![leaf("query")])
            .with_usage_notes("Always LIMIT your queries.");
        let context = node.context_capability(&node.select("{}"));

        assert_eq!(context.name(), "database_context");
        assert!(context.description().contains("query (query leaf)"));
        assert!(!context.description().contains("second line"));

        let detail = context
            .call("", &CallContext::detached("call-2"))
            .await
            .expect("context call succeeds");
        let text = detail.model_text();
        assert!(text.contains("## query"));
        assert!(text.contains("second line"));
        assert!(text.contains("Always LIMIT your queries."));
        assert!(context.as_disclosure().is_none());
    }
}
