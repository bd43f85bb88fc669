//! Work Item Query Language (WIQL) text for the id-listing query used by sync.

use std::collections::{BTreeSet, HashSet};

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Result sets larger than this are logged by callers; the query is not altered.
pub const LARGE_RESULT_THRESHOLD: usize = 1000;

/// Escapes a value for embedding inside a single-quoted WIQL literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn quote(value: &str) -> String {
    format!("'{}'", escape_literal(value))
}

/// WIQL date literals are UTC ISO-8601; requires `timePrecision=true` on the request.
fn format_timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    // Cannot fail: every component is available on an OffsetDateTime.
    at.to_offset(UtcOffset::UTC)
        .format(format)
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiqlQuery {
    project: String,
    iteration_paths: BTreeSet<String>,
    changed_since: Option<OffsetDateTime>,
}

impl WiqlQuery {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            iteration_paths: BTreeSet::new(),
            changed_since: None,
        }
    }

    /// Restricts the query to the given iteration paths. Duplicates and blank
    /// paths are dropped.
    pub fn with_iteration_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.iteration_paths.extend(
            paths
                .into_iter()
                .map(Into::into)
                .filter(|path| !path.trim().is_empty()),
        );
        self
    }

    pub fn changed_since(mut self, since: Option<OffsetDateTime>) -> Self {
        self.changed_since = since;
        self
    }

    pub fn is_incremental(&self) -> bool {
        self.changed_since.is_some()
    }

    pub fn iteration_paths(&self) -> impl Iterator<Item = &str> {
        self.iteration_paths.iter().map(String::as_str)
    }

    pub fn build(&self) -> String {
        let mut query = format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = {}",
            quote(&self.project)
        );
        if !self.iteration_paths.is_empty() {
            let paths = self
                .iteration_paths
                .iter()
                .map(|path| quote(path))
                .collect::<Vec<_>>()
                .join(", ");
            query.push_str(&format!(" AND [System.IterationPath] IN ({paths})"));
        }
        if let Some(since) = self.changed_since {
            query.push_str(&format!(
                " AND [System.ChangedDate] >= '{}'",
                format_timestamp(since)
            ));
        }
        query.push_str(" ORDER BY [System.Id]");
        query
    }
}

/// Splits ids into batches of at most `size`, keeping source order and dropping
/// repeated ids.
pub fn chunk_ids(ids: &[i64], size: usize) -> Vec<Vec<i64>> {
    let size = size.max(1);
    let mut seen = HashSet::with_capacity(ids.len());
    let unique: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
    unique.chunks(size).map(<[i64]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reads back every single-quoted literal the way the WIQL parser does.
    fn literals(query: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut chars = query.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '\'' {
                continue;
            }
            let mut literal = String::new();
            while let Some(ch) = chars.next() {
                if ch == '\'' {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                        literal.push('\'');
                    } else {
                        break;
                    }
                } else {
                    literal.push(ch);
                }
            }
            out.push(literal);
        }
        out
    }

    #[test]
    fn full_scan_has_only_project_filter() {
        let query = WiqlQuery::new("Fabrikam").build();
        assert_eq!(
            query,
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = 'Fabrikam' ORDER BY [System.Id]"
        );
    }

    #[test]
    fn paths_are_deduplicated_and_filtered() {
        let query = WiqlQuery::new("Fabrikam")
            .with_iteration_paths(["Fabrikam\\Sprint 1", "Fabrikam\\Sprint 1", " "])
            .build();
        assert_eq!(query.matches("Sprint 1").count(), 1);
        assert!(query.contains("[System.IterationPath] IN ('Fabrikam\\Sprint 1')"));
    }

    #[test]
    fn incremental_query_adds_changed_date() {
        let since = OffsetDateTime::from_unix_timestamp(1_704_067_200).unwrap();
        let query = WiqlQuery::new("Fabrikam")
            .changed_since(Some(since))
            .build();
        assert!(query.contains("AND [System.ChangedDate] >= '2024-01-01T00:00:00Z'"));
        assert!(query.ends_with("ORDER BY [System.Id]"));
    }

    #[test]
    fn changed_date_is_rendered_in_utc() {
        let since = OffsetDateTime::from_unix_timestamp(1_709_251_205)
            .unwrap()
            .to_offset(time::macros::offset!(+3));
        let query = WiqlQuery::new("Fabrikam")
            .changed_since(Some(since))
            .build();
        assert!(query.contains(">= '2024-03-01T00:00:05Z'"));
    }

    #[test]
    fn quotes_are_doubled_and_recoverable() {
        let project = "O'Brien's Team";
        let paths = ["O'Brien's Team\\Sprint 'A'", "Plain\\Path"];
        let query = WiqlQuery::new(project)
            .with_iteration_paths(paths)
            .build();

        assert!(query.contains("'O''Brien''s Team'"));
        assert!(query.contains("'O''Brien''s Team\\Sprint ''A'''"));

        let recovered = literals(&query);
        assert_eq!(recovered[0], project);
        assert!(recovered.contains(&paths[0].to_string()));
        assert!(recovered.contains(&paths[1].to_string()));
    }

    #[test]
    fn escape_literal_leaves_plain_text_alone() {
        assert_eq!(escape_literal("Sprint 1"), "Sprint 1");
        assert_eq!(escape_literal("''"), "''''");
    }

    #[test]
    fn chunk_ids_keeps_order_and_bounds_size() {
        let ids = [5, 3, 5, 9, 1, 3, 7];
        let chunks = chunk_ids(&ids, 2);
        assert_eq!(chunks, vec![vec![5, 3], vec![9, 1], vec![7]]);
        assert!(chunk_ids(&[], 50).is_empty());
    }
}
