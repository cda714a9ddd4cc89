//! Permission rule tables
//!
//! Two rule shapes share one result type, a (principal, role) grant:
//! - `AppRule`: an object carrying a tag in a category gets a role
//! - `OsRule`: a VM whose guest OS matches a pattern gets a tag and a role

use crate::models::principal;
use regex::Regex;

pub mod loader;

pub use loader::{load_app_rules, load_os_rules, read_app_rules, read_os_rules};

/// Maps a tag in a category to a role for a security group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRule {
    pub tag_category: String,
    pub tag_name: String,
    pub role: String,
    pub group_domain: String,
    pub group_name: String,
}

impl AppRule {
    pub fn principal(&self) -> String {
        principal(&self.group_domain, &self.group_name)
    }

    /// Category names compare case-insensitively
    pub fn in_category(&self, category: &str) -> bool {
        self.tag_category.eq_ignore_ascii_case(category)
    }
}

/// Maps a guest OS pattern to an OS tag and a role for a security group
#[derive(Debug, Clone)]
pub struct OsRule {
    /// Unanchored pattern matched against guest OS strings
    pub pattern: Regex,
    pub target_tag: String,
    pub role: String,
    pub group_domain: String,
    pub group_name: String,
}

impl OsRule {
    pub fn principal(&self) -> String {
        principal(&self.group_domain, &self.group_name)
    }

    pub fn matches(&self, os: &str) -> bool {
        self.pattern.is_match(os)
    }
}

/// Both rule tables, in file order
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub app_rules: Vec<AppRule>,
    pub os_rules: Vec<OsRule>,
}

impl RuleSet {
    pub fn new(app_rules: Vec<AppRule>, os_rules: Vec<OsRule>) -> Self {
        Self {
            app_rules,
            os_rules,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.app_rules.is_empty() && self.os_rules.is_empty()
    }

    /// Distinct (category, tag) pairs the app rules refer to, first-seen order
    pub fn app_tags(&self) -> Vec<(String, String)> {
        let mut seen = Vec::<(String, String)>::new();
        for rule in &self.app_rules {
            let exists = seen
                .iter()
                .any(|(c, t)| c.eq_ignore_ascii_case(&rule.tag_category) && *t == rule.tag_name);
            if !exists {
                seen.push((rule.tag_category.clone(), rule.tag_name.clone()));
            }
        }
        seen
    }

    /// Distinct app categories, first-seen order
    pub fn app_categories(&self) -> Vec<String> {
        let mut seen = Vec::<String>::new();
        for rule in &self.app_rules {
            if !seen.iter().any(|c| c.eq_ignore_ascii_case(&rule.tag_category)) {
                seen.push(rule.tag_category.clone());
            }
        }
        seen
    }

    /// Distinct OS target tags, first-seen order
    pub fn os_tags(&self) -> Vec<String> {
        let mut seen = Vec::<String>::new();
        for rule in &self.os_rules {
            if !seen.contains(&rule.target_tag) {
                seen.push(rule.target_tag.clone());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(category: &str, tag: &str) -> AppRule {
        AppRule {
            tag_category: category.to_string(),
            tag_name: tag.to_string(),
            role: "Role".to_string(),
            group_domain: "LAB.local".to_string(),
            group_name: "Team".to_string(),
        }
    }

    #[test]
    fn test_principal_format() {
        let rule = AppRule {
            group_domain: "DLA-Kleber.local".to_string(),
            group_name: "Directory Services Exchange Team".to_string(),
            ..app("App", "Exchange-admins")
        };
        assert_eq!(
            rule.principal(),
            "DLA-Kleber.local\\Directory Services Exchange Team"
        );
    }

    #[test]
    fn test_app_tags_are_deduplicated_case_insensitively() {
        let rules = RuleSet::new(
            vec![app("App", "SQL"), app("app", "SQL"), app("App", "Web"), app("Function", "SQL")],
            vec![],
        );
        assert_eq!(
            rules.app_tags(),
            vec![
                ("App".to_string(), "SQL".to_string()),
                ("App".to_string(), "Web".to_string()),
                ("Function".to_string(), "SQL".to_string()),
            ]
        );
        assert_eq!(rules.app_categories(), vec!["App", "Function"]);
    }
}
