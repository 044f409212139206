// Category rules - rules as data
// Pattern matching rules that assign a spending category to a transaction
// description. First matching rule wins; rules are sorted by priority.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Pattern to match (supports wildcards with *)
    pub pattern: String,

    /// Category to assign
    pub category: String,

    /// Priority (higher = applied first)
    #[serde(default)]
    pub priority: i32,
}

impl CategoryRule {
    pub fn new(pattern: &str, category: &str, priority: i32) -> Self {
        CategoryRule {
            pattern: pattern.to_string(),
            category: category.to_string(),
            priority,
        }
    }

    /// Check if pattern matches the given text
    pub fn matches(&self, text: &str) -> bool {
        let pattern_lower = self.pattern.to_lowercase();
        let text_lower = text.to_lowercase();

        if pattern_lower.contains('*') {
            // Wildcard matching
            let parts: Vec<&str> = pattern_lower.split('*').collect();

            if parts.is_empty() {
                return false;
            }

            if !parts[0].is_empty() && !text_lower.starts_with(parts[0]) {
                return false;
            }

            if !parts[parts.len() - 1].is_empty() && !text_lower.ends_with(parts[parts.len() - 1])
            {
                return false;
            }

            // Check middle parts appear in order
            let mut current_pos = parts[0].len();
            for part in &parts[1..parts.len() - 1] {
                if part.is_empty() {
                    continue;
                }
                if let Some(pos) = text_lower[current_pos..].find(part) {
                    current_pos += pos + part.len();
                } else {
                    return false;
                }
            }

            true
        } else {
            // Substring match (case-insensitive)
            text_lower.contains(&pattern_lower)
        }
    }
}

// ============================================================================
// CATEGORY MATCHER
// ============================================================================

pub const UNCATEGORIZED: &str = "Uncategorized";

pub struct CategoryMatcher {
    rules: Vec<CategoryRule>,
}

impl CategoryMatcher {
    /// Create a matcher with no rules (everything is Uncategorized)
    pub fn new() -> Self {
        CategoryMatcher { rules: Vec::new() }
    }

    /// Built-in rules covering common treasury line items
    pub fn with_defaults() -> Self {
        Self::from_rules(default_rules())
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: Vec<CategoryRule> =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        Ok(Self::from_rules(rules))
    }

    /// Create matcher from a list of rules
    pub fn from_rules(mut rules: Vec<CategoryRule>) -> Self {
        // Sort by priority (higher first)
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        CategoryMatcher { rules }
    }

    pub fn add_rule(&mut self, rule: CategoryRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Assign a category to a transaction description.
    pub fn categorize(&self, description: &str) -> String {
        for rule in &self.rules {
            if rule.matches(description) {
                return rule.category.clone();
            }
        }
        UNCATEGORIZED.to_string()
    }
}

impl Default for CategoryMatcher {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn default_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new("payroll", "Payroll", 10),
        CategoryRule::new("salary", "Payroll", 10),
        CategoryRule::new("rent", "Facilities", 5),
        CategoryRule::new("lease", "Facilities", 5),
        CategoryRule::new("tax", "Tax", 10),
        CategoryRule::new("irs", "Tax", 10),
        CategoryRule::new("utility", "Utilities", 5),
        CategoryRule::new("electric", "Utilities", 5),
        CategoryRule::new("insurance", "Insurance", 5),
        CategoryRule::new("*fee*", "Bank Fees", 1),
        CategoryRule::new("interest", "Interest", 5),
        CategoryRule::new("invoice", "Vendor Payments", 2),
        CategoryRule::new("supplier", "Vendor Payments", 2),
        CategoryRule::new("transfer", "Transfers", 1),
        CategoryRule::new("wire", "Transfers", 1),
    ]
}
