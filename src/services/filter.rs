//! Worker enumeration filters: a two-level OR-of-ANDs over metadata
//! properties.

use super::metadata::WorkerMetadata;
use crate::executor::WorkerStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comparator for ordered properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterComparator {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl FilterComparator {
    fn matches<T: PartialOrd>(&self, actual: &T, expected: &T) -> bool {
        match self {
            FilterComparator::Equal => actual == expected,
            FilterComparator::NotEqual => actual != expected,
            FilterComparator::Greater => actual > expected,
            FilterComparator::GreaterEqual => actual >= expected,
            FilterComparator::Less => actual < expected,
            FilterComparator::LessEqual => actual <= expected,
        }
    }
}

/// Comparator for string properties; `Like` is a glob with `*` and `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringFilterComparator {
    Equal,
    NotEqual,
    Like,
    NotLike,
}

impl StringFilterComparator {
    fn matches(&self, actual: &str, expected: &str) -> bool {
        match self {
            StringFilterComparator::Equal => actual == expected,
            StringFilterComparator::NotEqual => actual != expected,
            StringFilterComparator::Like => glob_match(expected, actual),
            StringFilterComparator::NotLike => !glob_match(expected, actual),
        }
    }
}

/// A single property predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerPropertyFilter {
    /// Worker name.
    Name {
        comparator: StringFilterComparator,
        value: String,
    },
    /// Current status.
    Status {
        comparator: FilterComparator,
        value: WorkerStatus,
    },
    /// Pinned component version.
    Version {
        comparator: FilterComparator,
        value: u64,
    },
    /// Creation timestamp.
    CreatedAt {
        comparator: FilterComparator,
        value: DateTime<Utc>,
    },
    /// One environment variable. A worker without the variable never
    /// matches, not even `NotEqual`.
    Env {
        name: String,
        comparator: StringFilterComparator,
        value: String,
    },
}

impl WorkerPropertyFilter {
    pub fn matches(&self, metadata: &WorkerMetadata) -> bool {
        match self {
            WorkerPropertyFilter::Name { comparator, value } => {
                comparator.matches(&metadata.worker_id.worker_name, value)
            }
            WorkerPropertyFilter::Status { comparator, value } => {
                comparator.matches(&(metadata.status as u8), &(*value as u8))
            }
            WorkerPropertyFilter::Version { comparator, value } => {
                comparator.matches(&metadata.component_version, value)
            }
            WorkerPropertyFilter::CreatedAt { comparator, value } => {
                comparator.matches(&metadata.created_at, value)
            }
            WorkerPropertyFilter::Env {
                name,
                comparator,
                value,
            } => metadata
                .env_var(name)
                .is_some_and(|actual| comparator.matches(actual, value)),
        }
    }
}

/// Conjunction: every property filter must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerAllFilter {
    pub filters: Vec<WorkerPropertyFilter>,
}

impl WorkerAllFilter {
    pub fn new(filters: Vec<WorkerPropertyFilter>) -> Self {
        Self { filters }
    }

    pub fn matches(&self, metadata: &WorkerMetadata) -> bool {
        self.filters.iter().all(|f| f.matches(metadata))
    }
}

/// Disjunction of conjunctions: at least one clause must match. An empty
/// filter matches every worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerAnyFilter {
    pub filters: Vec<WorkerAllFilter>,
}

impl WorkerAnyFilter {
    pub fn new(filters: Vec<WorkerAllFilter>) -> Self {
        Self { filters }
    }

    pub fn matches(&self, metadata: &WorkerMetadata) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.matches(metadata))
    }
}

/// Glob match with `*` (any run) and `?` (any one char), byte-wise.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star, mut mark) = (usize::MAX, 0usize);

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = p;
            mark = t;
            p += 1;
        } else if star != usize::MAX {
            // Backtrack: let the last star swallow one more byte.
            p = star + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ComponentId, OplogIndex, RetryPolicy, WorkerId};

    fn metadata(name: &str, status: WorkerStatus, version: u64) -> WorkerMetadata {
        WorkerMetadata {
            worker_id: WorkerId {
                component_id: ComponentId::new(),
                worker_name: name.to_string(),
            },
            component_id: ComponentId::new(),
            component_version: version,
            args: vec![],
            env: vec![("REGION".to_string(), "eu-west-1".to_string())],
            status,
            retry_policy: RetryPolicy::DEFAULT,
            failed_attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            last_oplog_index: OplogIndex::INITIAL,
            active_plugins: vec![],
        }
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match("cart-*", "cart-123"));
        assert!(glob_match("*", ""));
        assert!(glob_match("c?rt", "cart"));
        assert!(glob_match("*-eu-*", "cart-eu-1"));
        assert!(!glob_match("cart-*", "order-1"));
        assert!(!glob_match("c?rt", "crt"));
    }

    #[test]
    fn name_like_filter() {
        let m = metadata("cart-42", WorkerStatus::Idle, 0);
        let f = WorkerPropertyFilter::Name {
            comparator: StringFilterComparator::Like,
            value: "cart-*".to_string(),
        };
        assert!(f.matches(&m));
        let f = WorkerPropertyFilter::Name {
            comparator: StringFilterComparator::NotLike,
            value: "order-*".to_string(),
        };
        assert!(f.matches(&m));
    }

    #[test]
    fn missing_env_var_never_matches() {
        let m = metadata("w", WorkerStatus::Idle, 0);
        let f = WorkerPropertyFilter::Env {
            name: "MISSING".to_string(),
            comparator: StringFilterComparator::NotEqual,
            value: "x".to_string(),
        };
        assert!(!f.matches(&m));
        let f = WorkerPropertyFilter::Env {
            name: "REGION".to_string(),
            comparator: StringFilterComparator::Like,
            value: "eu-*".to_string(),
        };
        assert!(f.matches(&m));
    }

    #[test]
    fn any_of_all_semantics() {
        let m = metadata("cart-1", WorkerStatus::Failed, 3);
        let failed_v3 = WorkerAllFilter::new(vec![
            WorkerPropertyFilter::Status {
                comparator: FilterComparator::Equal,
                value: WorkerStatus::Failed,
            },
            WorkerPropertyFilter::Version {
                comparator: FilterComparator::GreaterEqual,
                value: 3,
            },
        ]);
        let idle = WorkerAllFilter::new(vec![WorkerPropertyFilter::Status {
            comparator: FilterComparator::Equal,
            value: WorkerStatus::Idle,
        }]);
        assert!(WorkerAnyFilter::new(vec![idle.clone(), failed_v3.clone()]).matches(&m));
        assert!(!WorkerAnyFilter::new(vec![idle]).matches(&m));
        assert!(WorkerAnyFilter::default().matches(&m));
    }
}
