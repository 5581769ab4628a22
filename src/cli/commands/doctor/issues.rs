use super::types::{Issue, IssueCategory};
use std::collections::BTreeMap;

/// Flat, ordered list of every issue raised during one run
#[derive(Debug, Clone, Default)]
pub struct IssueAggregator {
    issues: Vec<Issue>,
}

impl IssueAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        self.issues.extend(issues);
    }

    pub fn all(&self) -> &[Issue] {
        &self.issues
    }

    /// Issues ordered from most to least severe, stable within a severity
    pub fn ranked(&self) -> Vec<&Issue> {
        let mut ranked: Vec<&Issue> = self.issues.iter().collect();
        ranked.sort_by_key(|i| i.severity);
        ranked
    }

    /// Issues grouped by category in category order, most severe first
    /// inside each group
    pub fn by_category(&self) -> BTreeMap<IssueCategory, Vec<&Issue>> {
        let mut groups: BTreeMap<IssueCategory, Vec<&Issue>> = BTreeMap::new();
        for issue in self.ranked() {
            groups.entry(issue.category).or_default().push(issue);
        }
        groups
    }

    pub fn into_vec(self) -> Vec<Issue> {
        self.issues
    }
}

impl FromIterator<Issue> for IssueAggregator {
    fn from_iter<I: IntoIterator<Item = Issue>>(iter: I) -> Self {
        Self {
            issues: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::doctor::types::{Severity, Solution};

    fn issue(category: IssueCategory, severity: Severity, title: &str) -> Issue {
        Issue::new(category, severity, title, "", Solution::text("fix it"))
    }

    fn sample() -> IssueAggregator {
        let mut issues = IssueAggregator::new();
        issues.extend([
            issue(IssueCategory::Firewall, Severity::Medium, "ufw rule"),
            issue(IssueCategory::Containers, Severity::Critical, "not started"),
            issue(IssueCategory::Firewall, Severity::High, "ufw active"),
            issue(IssueCategory::Waf, Severity::Low, "cdn"),
            issue(IssueCategory::Firewall, Severity::Medium, "iptables drop"),
        ]);
        issues
    }

    #[test]
    fn test_groups_follow_category_order_and_rank_by_severity() {
        let issues = sample();
        let groups = issues.by_category();
        let order: Vec<IssueCategory> = groups.keys().copied().collect();
        assert_eq!(order, vec![IssueCategory::Containers, IssueCategory::Firewall, IssueCategory::Waf]);
        let firewall: Vec<&str> = groups[&IssueCategory::Firewall].iter().map(|i| i.title.as_str()).collect();
        assert_eq!(firewall, vec!["ufw active", "ufw rule", "iptables drop"]);
    }

    #[test]
    fn test_ranking_is_stable_within_a_severity() {
        let issues = sample();
        let ranked: Vec<&str> = issues.ranked().iter().map(|i| i.title.as_str()).collect();
        assert_eq!(ranked, vec!["not started", "ufw active", "ufw rule", "iptables drop", "cdn"]);
    }

    #[test]
    fn test_identical_issues_are_kept() {
        let issues: IssueAggregator = [
            issue(IssueCategory::Ports, Severity::High, "closed"),
            issue(IssueCategory::Ports, Severity::High, "closed"),
        ]
        .into_iter()
        .collect();
        assert_eq!(issues.into_vec().len(), 2);
    }
}
