//! Deterministic selection of the test cases a batch will run.

use crate::core::batch::Selection;
use crate::core::catalog::Catalog;
use crate::core::types::TestCaseDefinition;

/// Intersect the catalog with a selection scope.
///
/// Catalog order is preserved; the selection never reorders cases. Names or
/// categories that do not exist in the catalog are ignored.
pub fn select_cases(catalog: &Catalog, selection: Selection<'_>) -> Vec<TestCaseDefinition> {
    catalog
        .cases()
        .iter()
        .filter(|case| match selection {
            Selection::All => true,
            Selection::Names(names) => names.iter().any(|name| name == &case.name),
            Selection::Categories(categories) => categories.iter().any(|c| c == &case.category),
        })
        .cloned()
        .collect()
}
