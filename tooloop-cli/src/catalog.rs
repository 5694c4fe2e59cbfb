//! Capability catalog: static capabilities and disclosure groups declared in TOML.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use tooloop_core::capability::{CapabilityRef, CapabilityResult, FnCapability};
use tooloop_core::disclosure::{CategorySelector, DisclosureNode};
use tooloop_core::error::CapabilityError;
use tooloop_core::replan::ReplanRequest;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    /// Names visible before the first round-trip. Defaults to every top-level item.
    #[serde(default)]
    pub active: Option<Vec<String>>,
    #[serde(default)]
    pub capabilities: Vec<CapabilitySpec>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
    #[serde(default)]
    pub response: String,
    /// When set, calling the capability asks for a replan with this reason.
    #[serde(default)]
    pub replan: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub name: String,
    pub description: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub usage_notes: Option<String>,
    #[serde(default = "default_remove_on_invoke")]
    pub remove_on_invoke: bool,
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
}

fn default_remove_on_invoke() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("name '{0}' is declared more than once")]
    DuplicateName(String),

    #[error("group '{group}' references unknown member '{member}'")]
    UnknownMember { group: String, member: String },

    #[error("group '{group}' category '{category}' lists '{member}', which is not a member")]
    UnknownCategoryMember {
        group: String,
        category: String,
        member: String,
    },

    #[error("group '{0}' contains itself")]
    Cycle(String),

    #[error("active list references unknown name '{0}'")]
    UnknownActive(String),

    #[error("active list names '{0}' more than once")]
    DuplicateActive(String),
}

/// A resolved catalog: every named item built once and shared.
#[derive(Debug)]
pub struct Catalog {
    items: HashMap<String, CapabilityRef>,
    active: Vec<String>,
}

impl Catalog {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn active_names(&self) -> &[String] {
        &self.active
    }

    /// Initial active set, in catalog order.
    pub fn active(&self) -> Vec<CapabilityRef> {
        self.active
            .iter()
            .filter_map(|name| self.items.get(name).cloned())
            .collect()
    }
}

pub fn load_catalog(path: &Path) -> Result<Catalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog: {}", path.display()))?;
    let file: CatalogFile =
        toml::from_str(&content).with_context(|| format!("parsing catalog: {}", path.display()))?;
    let catalog = build_catalog(file)
        .with_context(|| format!("validating catalog: {}", path.display()))?;
    Ok(catalog)
}

pub fn build_catalog(file: CatalogFile) -> Result<Catalog, CatalogError> {
    let mut seen = HashSet::new();
    let names = file
        .capabilities
        .iter()
        .map(|c| &c.name)
        .chain(file.groups.iter().map(|g| &g.name));
    for name in names {
        if !seen.insert(name.clone()) {
            return Err(CatalogError::DuplicateName(name.clone()));
        }
    }

    let groups: HashMap<&str, &GroupSpec> =
        file.groups.iter().map(|g| (g.name.as_str(), g)).collect();
    for group in &file.groups {
        for member in &group.members {
            if !seen.contains(member) {
                return Err(CatalogError::UnknownMember {
                    group: group.name.clone(),
                    member: member.clone(),
                });
            }
        }
        for (category, members) in &group.categories {
            if let Some(member) = members.iter().find(|m| !group.members.contains(m)) {
                return Err(CatalogError::UnknownCategoryMember {
                    group: group.name.clone(),
                    category: category.clone(),
                    member: member.clone(),
                });
            }
        }
    }

    let mut items: HashMap<String, CapabilityRef> = file
        .capabilities
        .iter()
        .map(|spec| (spec.name.clone(), static_capability(spec)))
        .collect();
    for group in &file.groups {
        build_group(group, &groups, &mut items, &mut Vec::new())?;
    }

    let active = match file.active {
        Some(active) => {
            if let Some(unknown) = active.iter().find(|name| !items.contains_key(*name)) {
                return Err(CatalogError::UnknownActive(unknown.clone()));
            }
            let mut seen = HashSet::new();
            if let Some(repeated) = active.iter().find(|name| !seen.insert(name.as_str())) {
                return Err(CatalogError::DuplicateActive(repeated.clone()));
            }
            active
        }
        None => {
            let nested: HashSet<&String> = file.groups.iter().flat_map(|g| &g.members).collect();
            file.capabilities
                .iter()
                .map(|c| &c.name)
                .chain(file.groups.iter().map(|g| &g.name))
                .filter(|name| !nested.contains(name))
                .cloned()
                .collect()
        }
    };

    Ok(Catalog { items, active })
}

fn build_group(
    group: &GroupSpec,
    groups: &HashMap<&str, &GroupSpec>,
    items: &mut HashMap<String, CapabilityRef>,
    visiting: &mut Vec<String>,
) -> Result<CapabilityRef, CatalogError> {
    if let Some(built) = items.get(&group.name) {
        return Ok(built.clone());
    }
    if visiting.contains(&group.name) {
        return Err(CatalogError::Cycle(group.name.clone()));
    }
    visiting.push(group.name.clone());

    let mut inner = Vec::with_capacity(group.members.len());
    for member in &group.members {
        let capability = match groups.get(member.as_str()) {
            Some(nested) => build_group(nested, groups, items, visiting)?,
            None => items
                .get(member)
                .cloned()
                .ok_or_else(|| CatalogError::UnknownMember {
                    group: group.name.clone(),
                    member: member.clone(),
                })?,
        };
        inner.push(capability);
    }
    visiting.pop();

    let mut node = DisclosureNode::new(&group.name, &group.description, inner);
    if !group.categories.is_empty() {
        let selector = group
            .categories
            .iter()
            .fold(CategorySelector::new(), |selector, (category, members)| {
                selector.with_category(category.clone(), members.iter().cloned())
            });
        node = node.with_selector(selector);
    }
    if !group.remove_on_invoke {
        node = node.keep_on_invoke();
    }
    if let Some(notes) = &group.usage_notes {
        node = node.with_usage_notes(notes.clone());
    }

    let built = node.into_ref();
    items.insert(group.name.clone(), built.clone());
    Ok(built)
}

fn static_capability(spec: &CapabilitySpec) -> CapabilityRef {
    let name = spec.name.clone();
    let response = spec.response.clone();
    let replan = spec.replan.clone();
    let capability = FnCapability::sync(&spec.name, &spec.description, move |_| {
        if let Some(reason) = &replan {
            return Err(CapabilityError::Replan(ReplanRequest::new(reason.clone())));
        }
        tracing::debug!(capability = %name, "static capability answered");
        Ok(CapabilityResult::text(response.clone()))
    });
    match &spec.schema {
        Some(schema) => capability.with_input_schema(schema.clone()).into_ref(),
        None => capability.into_ref(),
    }
}
