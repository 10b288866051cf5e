use crate::report::{AnalysisResult, Issue, Severity};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct GroupNode {
    pub shared_action: String,
    pub members: Vec<Issue>,
    pub affected_mods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsolidatedNode {
    Group(GroupNode),
    Single(Issue),
}

impl ConsolidatedNode {
    pub fn issues(&self) -> Vec<&Issue> {
        match self {
            ConsolidatedNode::Group(group) => group.members.iter().collect(),
            ConsolidatedNode::Single(issue) => vec![issue],
        }
    }

    pub fn issue_count(&self) -> usize {
        match self {
            ConsolidatedNode::Group(group) => group.members.len(),
            ConsolidatedNode::Single(_) => 1,
        }
    }

    pub fn title(&self) -> String {
        match self {
            ConsolidatedNode::Group(group) => {
                format!("{} ({} issues)", group.shared_action, group.members.len())
            }
            ConsolidatedNode::Single(issue) => {
                format!("{}: {}", issue.mod_label(), issue.display_message())
            }
        }
    }

    /// Everything the rendered card shows, used for text search.
    pub fn search_text(&self) -> String {
        match self {
            ConsolidatedNode::Group(group) => {
                let mut text = group.shared_action.clone();
                for name in &group.affected_mods {
                    text.push('\n');
                    text.push_str(name);
                }
                for issue in &group.members {
                    text.push('\n');
                    text.push_str(&issue.search_text());
                }
                text
            }
            ConsolidatedNode::Single(issue) => issue.search_text(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeveritySection {
    pub severity: Severity,
    pub nodes: Vec<ConsolidatedNode>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConsolidatedReport {
    pub sections: Vec<SeveritySection>,
}

impl ConsolidatedReport {
    pub fn section(&self, severity: Severity) -> Option<&SeveritySection> {
        self.sections
            .iter()
            .find(|section| section.severity == severity)
    }

    pub fn node_count(&self) -> usize {
        self.sections.iter().map(|section| section.nodes.len()).sum()
    }
}

/// Groups issues that share an identical remedy. Grouping uses exact string equality of the
/// action text; info issues are never grouped.
pub fn consolidate(severity: Severity, issues: &[Issue]) -> Vec<ConsolidatedNode> {
    if severity == Severity::Info {
        return issues.iter().cloned().map(ConsolidatedNode::Single).collect();
    }

    let mut action_order: Vec<&str> = Vec::new();
    let mut partitions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, issue) in issues.iter().enumerate() {
        let Some(action) = issue.action() else {
            continue;
        };
        let members = partitions.entry(action).or_insert_with(|| {
            action_order.push(action);
            Vec::new()
        });
        members.push(index);
    }

    let mut grouped = vec![false; issues.len()];
    let mut nodes = Vec::new();
    for action in action_order {
        let Some(indices) = partitions.get(action) else {
            continue;
        };
        if indices.len() < 2 {
            continue;
        }
        let members: Vec<Issue> = indices.iter().map(|index| issues[*index].clone()).collect();
        let mut affected_mods: Vec<String> = Vec::new();
        for issue in &members {
            if let Some(name) = issue.affected_mod.as_deref() {
                if !affected_mods.iter().any(|existing| existing == name) {
                    affected_mods.push(name.to_string());
                }
            }
        }
        for index in indices {
            grouped[*index] = true;
        }
        nodes.push(ConsolidatedNode::Group(GroupNode {
            shared_action: action.to_string(),
            members,
            affected_mods,
        }));
    }

    nodes.extend(
        issues
            .iter()
            .zip(grouped)
            .filter(|(_, grouped)| !grouped)
            .map(|(issue, _)| ConsolidatedNode::Single(issue.clone())),
    );
    nodes
}

pub fn consolidate_result(result: &AnalysisResult) -> ConsolidatedReport {
    ConsolidatedReport {
        sections: Severity::ALL
            .iter()
            .map(|severity| SeveritySection {
                severity: *severity,
                nodes: consolidate(*severity, result.bucket(*severity)),
            })
            .collect(),
    }
}
