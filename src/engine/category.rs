//! Rolls flat (category path, duration) entries into a report forest with
//! bottom-up duration sums.

use std::{collections::BTreeMap, sync::Arc};

use chrono::Duration;
use serde::{Deserialize, Serialize};

pub const UNCATEGORIZED: &str = "Uncategorized";

/// A node of the user's category forest. Roots have `parent_id = None`; the
/// store guarantees the forest stays acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: Arc<str>,
    #[serde(default)]
    pub parent_id: Option<u64>,
}

/// Derived report node. `total` covers durations attached directly to the
/// category plus everything below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryReport {
    pub name: Arc<str>,
    pub category_id: Option<u64>,
    pub total: Duration,
    pub children: Vec<CategoryReport>,
}

/// Builds the report forest out of flat entries. Pure: no incremental state,
/// calling twice with the same input produces structurally identical output.
/// Siblings are ordered by descending total, name ascending on ties; entries
/// with an empty path end up under a synthetic [UNCATEGORIZED] root that is
/// always last.
pub fn build_report(entries: Vec<(Vec<Category>, Duration)>) -> Vec<CategoryReport> {
    let mut roots = BTreeMap::<u64, Node>::new();
    let mut uncategorized: Option<Duration> = None;

    for (path, duration) in entries {
        if path.is_empty() {
            *uncategorized.get_or_insert(Duration::zero()) += duration;
            continue;
        }

        let mut level = &mut roots;
        let last_index = path.len() - 1;
        for (index, category) in path.into_iter().enumerate() {
            let node = level.entry(category.id).or_insert_with(|| Node {
                category,
                own: Duration::zero(),
                children: BTreeMap::new(),
            });
            if index == last_index {
                node.own += duration;
            }
            level = &mut node.children;
        }
    }

    let mut report = roots.into_values().map(Node::finalize).collect::<Vec<_>>();
    sort_siblings(&mut report);

    if let Some(total) = uncategorized {
        report.push(CategoryReport {
            name: UNCATEGORIZED.into(),
            category_id: None,
            total,
            children: vec![],
        });
    }

    report
}

struct Node {
    category: Category,
    own: Duration,
    children: BTreeMap<u64, Node>,
}

impl Node {
    fn finalize(self) -> CategoryReport {
        let mut children = self
            .children
            .into_values()
            .map(Node::finalize)
            .collect::<Vec<_>>();
        sort_siblings(&mut children);
        let total = self.own
            + children
                .iter()
                .fold(Duration::zero(), |sum, child| sum + child.total);
        CategoryReport {
            name: self.category.name,
            category_id: Some(self.category.id),
            total,
            children,
        }
    }
}

fn sort_siblings(nodes: &mut [CategoryReport]) {
    nodes.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: u64, name: &str, parent_id: Option<u64>) -> Category {
        Category {
            id,
            name: name.into(),
            parent_id,
        }
    }

    fn work_path() -> Vec<Category> {
        vec![category(1, "Work", None), category(2, "Coding", Some(1))]
    }

    #[test]
    fn test_totals_roll_up_bottom_up() {
        let report = build_report(vec![
            (work_path(), Duration::seconds(120)),
            (vec![category(1, "Work", None)], Duration::seconds(30)),
            (
                vec![category(1, "Work", None), category(3, "Email", Some(1))],
                Duration::seconds(10),
            ),
        ]);

        assert_eq!(report.len(), 1);
        let work = &report[0];
        assert_eq!(work.total, Duration::seconds(160));
        assert_eq!(work.children.len(), 2);
        // Descending by duration.
        assert_eq!(work.children[0].name.as_ref(), "Coding");
        assert_eq!(work.children[1].name.as_ref(), "Email");

        let leaf_sum = Duration::seconds(120 + 30 + 10);
        assert_eq!(work.total, leaf_sum);
    }

    #[test]
    fn test_sibling_ties_break_by_name() {
        let report = build_report(vec![
            (vec![category(5, "Browsing", None)], Duration::seconds(60)),
            (vec![category(4, "Art", None)], Duration::seconds(60)),
        ]);
        assert_eq!(report[0].name.as_ref(), "Art");
        assert_eq!(report[1].name.as_ref(), "Browsing");
    }

    #[test]
    fn test_uncategorized_sorts_last_regardless_of_duration() {
        let report = build_report(vec![
            (vec![], Duration::seconds(10_000)),
            (vec![category(1, "Work", None)], Duration::seconds(5)),
        ]);
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].name.as_ref(), "Work");
        assert_eq!(report[1].name.as_ref(), UNCATEGORIZED);
        assert_eq!(report[1].total, Duration::seconds(10_000));
    }

    #[test]
    fn test_build_report_is_restartable() {
        let entries = || {
            vec![
                (work_path(), Duration::seconds(90)),
                (vec![], Duration::seconds(14)),
                (vec![category(4, "Games", None)], Duration::seconds(300)),
            ]
        };
        assert_eq!(build_report(entries()), build_report(entries()));
    }

    #[test]
    fn test_intermediate_nodes_created_on_demand() {
        let deep = vec![
            category(1, "Work", None),
            category(2, "Coding", Some(1)),
            category(3, "Reviews", Some(2)),
        ];
        let report = build_report(vec![(deep, Duration::seconds(45))]);
        let work = &report[0];
        assert_eq!(work.total, Duration::seconds(45));
        assert_eq!(work.children[0].children[0].name.as_ref(), "Reviews");
        assert_eq!(work.children[0].children[0].total, Duration::seconds(45));
    }
}
