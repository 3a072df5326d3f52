//! Destination set differ.

use std::collections::BTreeSet;

/// Destinations to remove and to install when moving between two specs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub to_add: BTreeSet<String>,
    pub to_delete: BTreeSet<String>,
}

impl DiffResult {
    /// True when nothing has to change.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_delete.is_empty()
    }

    /// Number of destinations touched.
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_delete.len()
    }
}

/// Computes `to_delete = old - new` and `to_add = new - old`.
///
/// Pure and deterministic; the two result sets are always disjoint.
pub fn diff(old: &BTreeSet<String>, new: &BTreeSet<String>) -> DiffResult {
    DiffResult {
        to_add: new.difference(old).cloned().collect(),
        to_delete: old.difference(new).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_overlapping_sets() {
        let a = set(&["10.1.0.0/24", "10.2.0.0/24", "10.3.0.0/24"]);
        let b = set(&["10.2.0.0/24", "10.3.0.0/24", "10.4.0.0/24"]);

        let result = diff(&a, &b);
        assert_eq!(result.to_add, set(&["10.4.0.0/24"]));
        assert_eq!(result.to_delete, set(&["10.1.0.0/24"]));
        assert!(result.to_add.is_disjoint(&result.to_delete));
    }

    #[test]
    fn test_diff_covers_union() {
        let a = set(&["10.1.0.0/24", "10.2.0.0/24"]);
        let b = set(&["10.2.0.0/24", "10.9.0.0/24"]);

        let result = diff(&a, &b);
        let unchanged: BTreeSet<String> = a.intersection(&b).cloned().collect();
        let mut covered = result.to_add.clone();
        covered.extend(result.to_delete.iter().cloned());
        covered.extend(unchanged);

        let union: BTreeSet<String> = a.union(&b).cloned().collect();
        assert_eq!(covered, union);
    }

    #[test]
    fn test_diff_unchanged_is_noop() {
        let a = set(&["10.1.0.0/24", "10.2.0.0/24"]);
        let result = diff(&a, &a);
        assert!(result.is_empty());
        assert_eq!(result.len(), 0);
    }

    #[test]
    fn test_diff_create_boundary() {
        let b = set(&["10.42.10.0/24"]);
        let result = diff(&BTreeSet::new(), &b);
        assert!(result.to_delete.is_empty());
        assert_eq!(result.to_add, b);
    }

    #[test]
    fn test_diff_delete_boundary() {
        let a = set(&["10.3.0.0/24"]);
        let result = diff(&a, &BTreeSet::new());
        assert!(result.to_add.is_empty());
        assert_eq!(result.to_delete, a);
    }
}
