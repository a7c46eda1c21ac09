//! Rule catalog discovery from a rules directory.
//!
//! Layout: `<rules_dir>/<category>/<name>.toml`. The directory name is the
//! category and the file stem is the test case name. Categories are visited
//! in sorted order, and rule files in sorted order within each category, so
//! discovery order (and therefore execution order) is stable.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::catalog::Catalog;
use crate::core::types::{Severity, TestCaseDefinition};

/// On-disk shape of a rule file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    severity: Severity,
    prompt: String,
    #[serde(default)]
    pass_conditions: Vec<String>,
    #[serde(default)]
    fail_conditions: Vec<String>,
}

/// Discover and load every rule under `rules_dir`.
#[instrument(skip_all, fields(rules_dir = %rules_dir.display()))]
pub fn load_catalog(rules_dir: &Path) -> Result<Catalog> {
    if !rules_dir.is_dir() {
        return Err(anyhow!("rules directory {} not found", rules_dir.display()));
    }

    let mut cases = Vec::new();
    for category_dir in sorted_entries(rules_dir)? {
        if !category_dir.is_dir() {
            continue;
        }
        let Some(category) = file_name(&category_dir) else {
            continue;
        };
        for rule_path in sorted_entries(&category_dir)? {
            if rule_path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
                continue;
            }
            cases.push(load_rule(&rule_path, &category)?);
        }
    }

    debug!(rules = cases.len(), "rules discovered");
    Catalog::new(cases).map_err(|errors| {
        anyhow!(
            "invalid rules in {}:\n- {}",
            rules_dir.display(),
            errors.join("\n- ")
        )
    })
}

fn load_rule(path: &Path, category: &str) -> Result<TestCaseDefinition> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("rule file name {}", path.display()))?
        .to_string();
    let contents =
        fs::read_to_string(path).with_context(|| format!("read rule {}", path.display()))?;
    let rule: RuleFile =
        toml::from_str(&contents).with_context(|| format!("parse rule {}", path.display()))?;
    Ok(TestCaseDefinition {
        name,
        category: category.to_string(),
        severity: rule.severity,
        prompt: rule.prompt,
        pass_conditions: rule.pass_conditions,
        fail_conditions: rule.fail_conditions,
    })
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.context("read entry")?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempRules;

    #[test]
    fn discovers_rules_in_sorted_order() {
        let rules = TempRules::new().expect("rules");
        rules.write_rule("jailbreak", "dan").expect("write");
        rules.write_rule("distraction", "poem").expect("write");
        rules.write_rule("distraction", "basic").expect("write");
        fs::write(rules.path().join("README.md"), "ignored").expect("write");
        fs::write(rules.path().join("distraction").join("notes.txt"), "ignored").expect("write");

        let catalog = load_catalog(rules.path()).expect("load");
        let names: Vec<&str> = catalog.cases().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["basic", "poem", "dan"]);
        assert_eq!(catalog.categories(), vec!["distraction", "jailbreak"]);

        let dan = catalog
            .cases()
            .iter()
            .find(|case| case.name == "dan")
            .expect("dan");
        assert_eq!(dan.category, "jailbreak");
        assert_eq!(dan.severity, Severity::High);
        assert_eq!(dan.pass_conditions, vec!["refuses"]);
    }

    #[test]
    fn rejects_duplicate_names_across_categories() {
        let rules = TempRules::new().expect("rules");
        rules.write_rule("a", "same").expect("write");
        rules.write_rule("b", "same").expect("write");
        let err = load_catalog(rules.path()).expect_err("duplicate");
        assert!(format!("{err:#}").contains("duplicate test case name 'same'"));
    }

    #[test]
    fn malformed_rule_names_the_file() {
        let rules = TempRules::new().expect("rules");
        rules
            .write_raw("a", "broken", "severity = \"extreme\"\nprompt = \"x\"\n")
            .expect("write");
        let err = load_catalog(rules.path()).expect_err("malformed");
        assert!(format!("{err:#}").contains("broken.toml"));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let rules = TempRules::new().expect("rules");
        let err = load_catalog(&rules.path().join("nope")).expect_err("missing");
        assert!(err.to_string().contains("not found"));
    }
}
