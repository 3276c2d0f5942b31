// Queue Domain Model - workflow allow-list

use std::collections::BTreeSet;
use std::fmt;

/// Which workflows a consumer is willing to claim
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorkflowFilter {
    #[default]
    Any,
    AllowList(BTreeSet<String>),
}

impl WorkflowFilter {
    /// Parse a comma separated allow-list; `*` or an empty list means any workflow
    pub fn parse(spec: &str) -> Self {
        let names: BTreeSet<String> = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() || names.contains("*") {
            WorkflowFilter::Any
        } else {
            WorkflowFilter::AllowList(names)
        }
    }

    pub fn allow<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            WorkflowFilter::Any
        } else {
            WorkflowFilter::AllowList(names)
        }
    }

    pub fn matches(&self, workflow: &str) -> bool {
        match self {
            WorkflowFilter::Any => true,
            WorkflowFilter::AllowList(names) => names.contains(workflow),
        }
    }

    /// Candidate workflow names in the form `JobStore::claim` expects
    pub fn candidates(&self) -> Option<Vec<String>> {
        match self {
            WorkflowFilter::Any => None,
            WorkflowFilter::AllowList(names) => Some(names.iter().cloned().collect()),
        }
    }
}

impl fmt::Display for WorkflowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowFilter::Any => f.write_str("*"),
            WorkflowFilter::AllowList(names) => {
                let joined: Vec<&str> = names.iter().map(String::as_str).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}
