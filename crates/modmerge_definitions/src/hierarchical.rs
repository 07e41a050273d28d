//! Directory-grouped display tree.
//!
//! Two levels: one node per parent directory, one child per `type_and_id` under
//! it. Nodes record which mods contributed by *name* only, so the tree has a
//! single owner and no back-references into the index. A tree is always built
//! fresh from an index snapshot; annotate it at build time rather than editing it.

use crate::definition::Definition;
use crate::indexed::IndexedDefinitions;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchicalDefinitions {
    /// Lowercase directory for top-level nodes, `type_and_id` for children.
    pub key: String,
    pub name: String,
    pub file_names: BTreeSet<String>,
    /// Sorted by name.
    pub children: Vec<HierarchicalDefinitions>,
    /// Names of non-game mods that contributed at or below this node.
    pub mods: BTreeSet<String>,
    pub non_game_definitions: usize,
    /// Opaque UI payload, e.g. conflict status.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub additional_data: serde_json::Value,
}

type Filter<'a> = Box<dyn Fn(&Definition) -> bool + 'a>;
type Annotator<'a> = Box<dyn Fn(&HierarchicalDefinitions) -> Option<serde_json::Value> + 'a>;

/// Builds a [`HierarchicalDefinitions`] forest from an index.
pub struct HierarchyBuilder<'a> {
    index: &'a IndexedDefinitions,
    filter: Option<Filter<'a>>,
    annotate: Option<Annotator<'a>>,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(index: &'a IndexedDefinitions) -> Self {
        Self {
            index,
            filter: None,
            annotate: None,
        }
    }

    /// Only include definitions matching `filter`.
    pub fn only<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Definition) -> bool + 'a,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Compute `additional_data` for every node once its contents are known.
    pub fn annotate<F>(mut self, annotate: F) -> Self
    where
        F: Fn(&HierarchicalDefinitions) -> Option<serde_json::Value> + 'a,
    {
        self.annotate = Some(Box::new(annotate));
        self
    }

    pub fn build(self) -> Vec<HierarchicalDefinitions> {
        // directory key -> (display name, type_and_id -> child)
        let mut directories: BTreeMap<String, (String, BTreeMap<String, HierarchicalDefinitions>)> =
            BTreeMap::new();

        for definition in self.index.get_all() {
            if let Some(filter) = &self.filter {
                if !filter(&definition) {
                    continue;
                }
            }

            let directory = definition.display_directory();
            let (_, children) = directories
                .entry(directory.to_lowercase())
                .or_insert_with(|| (directory.to_string(), BTreeMap::new()));

            let child = children
                .entry(definition.type_and_id().to_string())
                .or_insert_with(|| HierarchicalDefinitions {
                    key: definition.type_and_id().to_string(),
                    name: definition.id().to_string(),
                    ..Default::default()
                });
            child.file_names.insert(definition.file().to_string());
            if !definition.is_from_game {
                child.mods.insert(definition.mod_name.clone());
                child.non_game_definitions += 1;
            }
        }

        let mut nodes: Vec<HierarchicalDefinitions> = directories
            .into_iter()
            .map(|(key, (name, children))| {
                let mut children: Vec<_> = children.into_values().collect();
                children.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key.cmp(&b.key)));
                if let Some(annotate) = &self.annotate {
                    for child in &mut children {
                        child.additional_data = annotate(child).unwrap_or_default();
                    }
                }

                let mut node = HierarchicalDefinitions {
                    key,
                    name,
                    ..Default::default()
                };
                for child in &children {
                    node.file_names.extend(child.file_names.iter().cloned());
                    node.mods.extend(child.mods.iter().cloned());
                    node.non_game_definitions += child.non_game_definitions;
                }
                node.children = children;
                if let Some(annotate) = &self.annotate {
                    node.additional_data = annotate(&node).unwrap_or_default();
                }
                node
            })
            .collect();

        nodes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key.cmp(&b.key)));
        nodes
    }
}
