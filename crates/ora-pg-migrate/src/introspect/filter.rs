//! Include/exclude table selection.

use serde::{Deserialize, Serialize};

use crate::config::MigrationConfig;

/// Case-insensitive glob filter over table names. `*` matches any run of
/// characters, `?` matches exactly one.
///
/// A table is selected when it matches at least one include pattern (or the
/// include list is empty) and no exclude pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl TableFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        let upper = |p: &[String]| p.iter().map(|s| s.to_uppercase()).collect();
        Self {
            include: upper(include),
            exclude: upper(exclude),
        }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(&config.include_tables, &config.exclude_tables)
    }

    pub fn matches(&self, table: &str) -> bool {
        let name: Vec<char> = table.to_uppercase().chars().collect();
        let hit = |p: &String| {
            let pattern: Vec<char> = p.chars().collect();
            glob_match(&pattern, &name)
        };
        (self.include.is_empty() || self.include.iter().any(hit))
            && !self.exclude.iter().any(hit)
    }
}

/// Iterative wildcard match with single-star backtracking.
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_selects_all() {
        assert!(TableFilter::default().matches("ANYTHING"));
    }

    #[test]
    fn test_include_exclude() {
        let f = TableFilter::new(&s(&["ORDER*", "customers"]), &s(&["*_BAK"]));
        assert!(f.matches("ORDERS"));
        assert!(f.matches("ORDER_ITEMS"));
        assert!(f.matches("CUSTOMERS"));
        assert!(!f.matches("ORDERS_BAK"));
        assert!(!f.matches("PRODUCTS"));
    }

    #[test]
    fn test_question_mark() {
        let f = TableFilter::new(&s(&["T?"]), &[]);
        assert!(f.matches("T1"));
        assert!(!f.matches("T12"));
        assert!(!f.matches("T"));
    }

    #[test]
    fn test_star_backtracking() {
        let f = TableFilter::new(&s(&["*A*B"]), &[]);
        assert!(f.matches("XAYAB"));
        assert!(!f.matches("XAYBA"));
    }
}
