use std::collections::HashMap;

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::{DomainError, Result};

/// An organizational unit. Departments form a forest through `parent_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Department {
    id: Option<AggregateId>,
    name: String,
    parent_id: Option<AggregateId>,
    revision: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DepartmentEvent {
    DepartmentCreated {
        department_id: AggregateId,
        name: String,
        parent_id: Option<AggregateId>,
    },
    DepartmentRenamed {
        department_id: AggregateId,
        old_name: String,
        name: String,
        revision: u64,
    },
    DepartmentMoved {
        department_id: AggregateId,
        parent_id: Option<AggregateId>,
    },
}

impl DomainEvent for DepartmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DepartmentEvent::DepartmentCreated { .. } => "DepartmentCreated",
            DepartmentEvent::DepartmentRenamed { .. } => "DepartmentRenamed",
            DepartmentEvent::DepartmentMoved { .. } => "DepartmentMoved",
        }
    }
}

impl Aggregate for Department {
    type Event = DepartmentEvent;

    fn aggregate_type() -> &'static str {
        "Department"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: &DepartmentEvent) {
        match event {
            DepartmentEvent::DepartmentCreated {
                department_id,
                name,
                parent_id,
            } => {
                self.id = Some(*department_id);
                self.name = name.clone();
                self.parent_id = *parent_id;
                self.revision = 1;
            }
            DepartmentEvent::DepartmentRenamed { name, revision, .. } => {
                self.name = name.clone();
                self.revision = *revision;
            }
            DepartmentEvent::DepartmentMoved { parent_id, .. } => {
                self.parent_id = *parent_id;
            }
        }
    }
}

impl Department {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_id(&self) -> Option<AggregateId> {
        self.parent_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn create(
        existing: Option<&Department>,
        department_id: AggregateId,
        name: String,
        parent_id: Option<AggregateId>,
    ) -> Result<Vec<DepartmentEvent>> {
        if existing.is_some() {
            return Err(DomainError::AlreadyExists {
                kind: "Department",
                id: department_id,
            });
        }
        let name = super::role::validate_name(name)?;
        Ok(vec![DepartmentEvent::DepartmentCreated {
            department_id,
            name,
            parent_id,
        }])
    }

    /// Decides a rename. Renaming to the current name changes nothing.
    pub fn rename(&self, name: String) -> Result<Vec<DepartmentEvent>> {
        let name = super::role::validate_name(name)?;
        if name == self.name {
            return Ok(vec![]);
        }
        let department_id = self
            .id
            .ok_or(DomainError::InvalidCommand("department has no id".to_string()))?;
        Ok(vec![DepartmentEvent::DepartmentRenamed {
            department_id,
            old_name: self.name.clone(),
            name,
            revision: self.revision + 1,
        }])
    }

    /// Decides a move. The caller checks the new parent against the tree.
    pub fn move_to(&self, parent_id: Option<AggregateId>) -> Result<Vec<DepartmentEvent>> {
        if parent_id == self.parent_id {
            return Ok(vec![]);
        }
        let department_id = self
            .id
            .ok_or(DomainError::InvalidCommand("department has no id".to_string()))?;
        Ok(vec![DepartmentEvent::DepartmentMoved {
            department_id,
            parent_id,
        }])
    }
}

/// Arena view over all departments.
///
/// Nodes live in one vector; parent links are ids and the child lists are
/// built by a single grouping pass over the nodes.
#[derive(Debug, Default)]
pub struct DepartmentTree {
    nodes: Vec<Department>,
    index: HashMap<AggregateId, usize>,
    children: HashMap<Option<AggregateId>, Vec<usize>>,
}

impl DepartmentTree {
    /// Builds the tree. Departments without an id are skipped.
    pub fn build(departments: impl IntoIterator<Item = Department>) -> Self {
        let mut nodes: Vec<Department> = departments.into_iter().filter(|d| d.id.is_some()).collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut index = HashMap::with_capacity(nodes.len());
        let mut children: HashMap<Option<AggregateId>, Vec<usize>> = HashMap::new();
        for (position, node) in nodes.iter().enumerate() {
            if let Some(id) = node.id {
                index.insert(id, position);
            }
            children.entry(node.parent_id).or_default().push(position);
        }

        Self {
            nodes,
            index,
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: AggregateId) -> Option<&Department> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    /// Top-level departments, including ones whose parent is missing.
    pub fn roots(&self) -> Vec<&Department> {
        self.nodes
            .iter()
            .filter(|d| d.parent_id.is_none_or(|p| !self.index.contains_key(&p)))
            .collect()
    }

    /// Direct children, sorted by name.
    pub fn children(&self, id: AggregateId) -> Vec<&Department> {
        self.children
            .get(&Some(id))
            .map(|positions| positions.iter().map(|&i| &self.nodes[i]).collect())
            .unwrap_or_default()
    }

    /// Ids from the direct parent up to the root. Stops at a repeated id so
    /// corrupt data cannot loop forever.
    pub fn ancestors(&self, id: AggregateId) -> Vec<AggregateId> {
        let mut path = Vec::new();
        let mut current = self.get(id).and_then(|d| d.parent_id);
        while let Some(parent) = current {
            if parent == id || path.contains(&parent) {
                break;
            }
            path.push(parent);
            current = self.get(parent).and_then(|d| d.parent_id);
        }
        path
    }

    /// All ids below `id`, breadth first.
    pub fn descendants(&self, id: AggregateId) -> Vec<AggregateId> {
        let mut found = Vec::new();
        let mut frontier = vec![id];
        while let Some(next) = frontier.pop() {
            for child in self.children(next) {
                if let Some(child_id) = child.id
                    && child_id != id
                    && !found.contains(&child_id)
                {
                    found.push(child_id);
                    frontier.push(child_id);
                }
            }
        }
        found
    }

    /// Returns true if making `new_parent` the parent of `id` would close a
    /// cycle.
    pub fn would_cycle(&self, id: AggregateId, new_parent: AggregateId) -> bool {
        new_parent == id || self.ancestors(new_parent).contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn department(name: &str, parent_id: Option<AggregateId>) -> Department {
        let mut dept = Department::default();
        dept.apply_events(&Department::create(None, AggregateId::new(), name.into(), parent_id).unwrap());
        dept
    }

    #[test]
    fn rename_bumps_revision_and_same_name_is_no_op() {
        let mut dept = department("Sales", None);
        assert!(dept.rename("Sales".into()).unwrap().is_empty());

        let events = dept.rename("Revenue".into()).unwrap();
        dept.apply_events(&events);
        assert_eq!(dept.name(), "Revenue");
        assert_eq!(dept.revision(), 2);
    }

    #[test]
    fn tree_groups_children_and_walks_ancestors() {
        let root = department("Company", None);
        let root_id = root.id().unwrap();
        let sales = department("Sales", Some(root_id));
        let sales_id = sales.id().unwrap();
        let emea = department("EMEA", Some(sales_id));
        let emea_id = emea.id().unwrap();
        let ops = department("Ops", Some(root_id));

        let tree = DepartmentTree::build(vec![emea, ops, root, sales]);

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.roots().len(), 1);
        assert_eq!(tree.roots()[0].name(), "Company");
        let names: Vec<_> = tree.children(root_id).iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["Ops", "Sales"]);
        assert_eq!(tree.ancestors(emea_id), vec![sales_id, root_id]);
        assert_eq!(tree.descendants(root_id).len(), 3);
    }

    #[test]
    fn moving_under_a_descendant_is_a_cycle() {
        let root = department("Company", None);
        let root_id = root.id().unwrap();
        let sales = department("Sales", Some(root_id));
        let sales_id = sales.id().unwrap();
        let tree = DepartmentTree::build(vec![root, sales]);

        assert!(tree.would_cycle(root_id, sales_id));
        assert!(tree.would_cycle(root_id, root_id));
        assert!(!tree.would_cycle(sales_id, root_id));
    }

    #[test]
    fn orphans_are_treated_as_roots() {
        let orphan = department("Lost", Some(AggregateId::new()));
        let tree = DepartmentTree::build(vec![orphan]);
        assert_eq!(tree.roots().len(), 1);
    }
}
