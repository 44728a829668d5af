use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use shared_utils::types::{LIVER_LABEL, TUMOR_LABEL};

use crate::error::ConfigError;

/// Nest every entity labeled `child` under the entity labeled `parent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HierarchyRule {
    pub child: i32,
    pub parent: i32,
}

impl HierarchyRule {
    pub const fn new(child: i32, parent: i32) -> Self {
        Self { child, parent }
    }
}

impl fmt::Display for HierarchyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.child, self.parent)
    }
}

impl FromStr for HierarchyRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedRule(s.to_string());
        let (child, parent) = s.split_once(':').ok_or_else(malformed)?;
        let child = child.trim().parse().map_err(|_| malformed())?;
        let parent = parent.trim().parse().map_err(|_| malformed())?;
        Ok(Self { child, parent })
    }
}

/// A validated, immutable rule set.
///
/// Every child has at most one parent and the parent links are acyclic, so
/// evaluation order never changes the resulting tree.
#[derive(Clone, Debug, PartialEq)]
pub struct HierarchyRules {
    rules: Vec<HierarchyRule>,
}

impl Default for HierarchyRules {
    /// Tumor under liver.
    fn default() -> Self {
        Self {
            rules: vec![HierarchyRule::new(TUMOR_LABEL, LIVER_LABEL)],
        }
    }
}

impl HierarchyRules {
    pub fn new(rules: impl IntoIterator<Item = HierarchyRule>) -> Result<Self, ConfigError> {
        let mut unique: Vec<HierarchyRule> = Vec::new();
        let mut parents: HashMap<i32, i32> = HashMap::new();

        for rule in rules {
            if rule.child == rule.parent {
                return Err(ConfigError::SelfParent(rule.child));
            }
            match parents.get(&rule.child) {
                Some(&first) if first != rule.parent => {
                    return Err(ConfigError::ConflictingParents {
                        child: rule.child,
                        first,
                        second: rule.parent,
                    });
                }
                Some(_) => continue,
                None => {
                    parents.insert(rule.child, rule.parent);
                    unique.push(rule);
                }
            }
        }

        for &start in parents.keys() {
            let mut current = start;
            for _ in 0..parents.len() {
                match parents.get(&current) {
                    Some(&parent) if parent == start => return Err(ConfigError::Cycle(start)),
                    Some(&parent) => current = parent,
                    None => break,
                }
            }
        }

        Ok(Self { rules: unique })
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &HierarchyRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
