use std::collections::{BTreeMap, BTreeSet};

use odl_edm::EdmNavigationProperty;

/// Projection tree for one nesting level.
///
/// The root node comes from the writer's `select_clause` or the `$select`
/// part of a context URL; each navigation link narrows it with
/// [`SelectedPropertiesNode::child`].
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SelectedPropertiesNode {
    /// Nothing at this level is projected.
    Empty,
    /// No projection: everything is selected.
    #[default]
    EntireSubtree,
    Partial(PartialSelection),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartialSelection {
    /// `*` was present: every structural property is selected.
    pub all_structural: bool,
    /// Plainly selected names (structural or navigation).
    pub names: BTreeSet<String>,
    /// Names with a nested projection, `Orders(Id,Total)` or `Orders/Id`.
    pub children: BTreeMap<String, SelectedPropertiesNode>,
}

impl SelectedPropertiesNode {
    /// Parse a select list such as `Id,Name,Orders(Id,Total)`. A missing
    /// or blank clause selects everything.
    pub fn parse(clause: Option<&str>) -> Self {
        match clause.map(str::trim) {
            None | Some("") => Self::EntireSubtree,
            Some(text) => {
                let mut partial = PartialSelection::default();
                for item in split_top_level(text) {
                    partial.add(item.trim());
                }
                Self::Partial(partial)
            }
        }
    }

    pub fn is_entire_subtree(&self) -> bool {
        matches!(self, Self::EntireSubtree)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Structural property check.
    pub fn is_property_selected(&self, name: &str) -> bool {
        match self {
            Self::Empty => false,
            Self::EntireSubtree => true,
            Self::Partial(p) => {
                p.all_structural || p.names.contains(name) || p.children.contains_key(name)
            }
        }
    }

    /// Navigation properties are not covered by `*`.
    pub fn is_navigation_selected(&self, name: &str) -> bool {
        match self {
            Self::Empty => false,
            Self::EntireSubtree => true,
            Self::Partial(p) => p.names.contains(name) || p.children.contains_key(name),
        }
    }

    /// Projection that applies inside navigation property `name`.
    pub fn child(&self, name: &str) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::EntireSubtree => Self::EntireSubtree,
            Self::Partial(p) => match p.children.get(name) {
                Some(node) => node.clone(),
                None if p.names.contains(name) => Self::EntireSubtree,
                None => Self::Empty,
            },
        }
    }

    /// Subset of `candidates` selected at this level, in declaration order.
    pub fn selected_navigation_properties<'a>(
        &self,
        candidates: &'a [EdmNavigationProperty],
    ) -> Vec<&'a EdmNavigationProperty> {
        candidates
            .iter()
            .filter(|n| self.is_navigation_selected(&n.name))
            .collect()
    }
}

impl PartialSelection {
    fn add(&mut self, item: &str) {
        if item.is_empty() {
            return;
        }
        if item == "*" {
            self.all_structural = true;
            return;
        }
        if let Some(open) = item.find('(') {
            let name = item[..open].trim().to_string();
            let rest = item[open + 1..].trim_end();
            let inner = rest.strip_suffix(')').unwrap_or(rest);
            self.merge_child(name, SelectedPropertiesNode::parse(Some(inner)));
            return;
        }
        match item.split_once('/') {
            Some((head, rest)) => {
                let mut nested = PartialSelection::default();
                nested.add(rest);
                self.merge_child(head.to_string(), SelectedPropertiesNode::Partial(nested));
            }
            None => {
                self.names.insert(item.to_string());
            }
        }
    }

    fn merge_child(&mut self, name: String, node: SelectedPropertiesNode) {
        use SelectedPropertiesNode::*;
        let merged = match (self.children.remove(&name), node) {
            (None, node) => node,
            (Some(EntireSubtree), _) | (_, EntireSubtree) => EntireSubtree,
            (Some(Empty), other) | (Some(other), Empty) => other,
            (Some(Partial(mut a)), Partial(b)) => {
                a.all_structural |= b.all_structural;
                a.names.extend(b.names);
                for (k, v) in b.children {
                    a.merge_child(k, v);
                }
                Partial(a)
            }
        };
        self.children.insert(name, merged);
    }
}

/// Split on commas that are not nested in parentheses.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_clause_selects_everything() {
        let node = SelectedPropertiesNode::parse(None);
        assert!(node.is_entire_subtree());
        assert!(node.is_property_selected("Anything"));
        assert!(node.child("Orders").is_entire_subtree());
    }

    #[test]
    fn partial_selection_excludes_unnamed_navigation() {
        let node = SelectedPropertiesNode::parse(Some("Id,Name"));
        assert!(node.is_property_selected("Id"));
        assert!(!node.is_property_selected("Age"));
        assert!(node.child("Orders").is_empty());
    }

    #[test]
    fn nested_projection_narrows_per_navigation() {
        let node = SelectedPropertiesNode::parse(Some("Id,Orders(Id,Items(Sku)),Friends"));
        let orders = node.child("Orders");
        assert!(orders.is_property_selected("Id"));
        assert!(!orders.is_property_selected("Total"));
        assert!(orders.child("Items").is_property_selected("Sku"));
        assert!(node.child("Friends").is_entire_subtree());
        assert!(node.child("Manager").is_empty());
    }

    #[test]
    fn star_covers_structural_but_not_navigation() {
        let node = SelectedPropertiesNode::parse(Some("*"));
        assert!(node.is_property_selected("Name"));
        assert!(!node.is_navigation_selected("Orders"));
    }

    #[test]
    fn path_items_merge_into_children() {
        let node = SelectedPropertiesNode::parse(Some("Address/City,Address/Zip"));
        let address = node.child("Address");
        assert!(address.is_property_selected("City"));
        assert!(address.is_property_selected("Zip"));
        assert!(!address.is_property_selected("Street"));
    }

    #[test]
    fn selected_navigation_properties_keeps_declaration_order() {
        let navs = vec![
            EdmNavigationProperty::collection("Orders", "NS.Order"),
            EdmNavigationProperty::single("Manager", "NS.Person"),
            EdmNavigationProperty::collection("Friends", "NS.Person"),
        ];
        let node = SelectedPropertiesNode::parse(Some("Friends,Orders"));
        let names: Vec<_> = node
            .selected_navigation_properties(&navs)
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, ["Orders", "Friends"]);
    }
}
