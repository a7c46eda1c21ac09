//! In-memory test case catalog and its semantic invariants.

use std::collections::{BTreeSet, HashSet};

use crate::core::types::TestCaseDefinition;

/// Ordered set of test case definitions available to a coordinator.
///
/// Order is the discovery order supplied by the catalog provider and is the
/// execution order of every batch drawn from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    cases: Vec<TestCaseDefinition>,
}

impl Catalog {
    /// Build a catalog, rejecting definitions that violate [`validate_cases`].
    pub fn new(cases: Vec<TestCaseDefinition>) -> Result<Self, Vec<String>> {
        let errors = validate_cases(&cases);
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Self { cases })
    }

    pub fn cases(&self) -> &[TestCaseDefinition] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Distinct category names, sorted.
    pub fn categories(&self) -> Vec<String> {
        self.cases
            .iter()
            .map(|case| case.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Check invariants the catalog provider cannot express in the rule files:
/// - No duplicate names
/// - Names and categories are non-empty
/// - Prompts are non-empty
pub fn validate_cases(cases: &[TestCaseDefinition]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for case in cases {
        if case.name.trim().is_empty() {
            errors.push(format!("test case in '{}' has an empty name", case.category));
            continue;
        }
        if !seen.insert(case.name.as_str()) {
            errors.push(format!("duplicate test case name '{}'", case.name));
        }
        if case.category.trim().is_empty() {
            errors.push(format!("{}: category must be non-empty", case.name));
        }
        if case.prompt.trim().is_empty() {
            errors.push(format!("{}: prompt must be non-empty", case.name));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::case;

    #[test]
    fn categories_are_sorted_and_distinct() {
        let catalog = Catalog::new(vec![
            case("b1", "jailbreak"),
            case("a1", "distraction"),
            case("b2", "jailbreak"),
        ])
        .expect("catalog");
        assert_eq!(catalog.categories(), vec!["distraction", "jailbreak"]);
        assert_eq!(catalog.len(), 3);
        assert!(catalog.cases().iter().any(|case| case.name == "a1"));
    }

    #[test]
    fn reports_duplicates_and_empty_fields() {
        let mut blank = case("blank", "");
        blank.prompt = " ".to_string();
        let errors = Catalog::new(vec![case("dup", "x"), case("dup", "y"), blank])
            .expect_err("invalid catalog");
        assert!(errors.iter().any(|err| err.contains("duplicate test case name 'dup'")));
        assert!(errors.iter().any(|err| err.contains("category must be non-empty")));
        assert!(errors.iter().any(|err| err.contains("prompt must be non-empty")));
    }
}
