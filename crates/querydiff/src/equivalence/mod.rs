use crate::models::{ExecutionError, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaQueryStyle {
    /// `((A) EXCEPT (B)) UNION ALL ((B) EXCEPT (A))`
    Parenthesized,
    /// Same set differences spelled with derived tables, for engines that do
    /// not accept parenthesized compound operands.
    Subquery,
}

/// One connection able to run read-only SQL, one statement at a time.
pub trait QueryExecutor {
    fn meta_query_style(&self) -> MetaQueryStyle;

    /// Whether `sql` yields at least one row. Only the first row is fetched.
    fn returns_rows(&mut self, sql: &str) -> Result<bool, ExecutionError>;
}

/// Hands each worker its own executor, so no statement is ever shared across
/// threads. `worker` is a zero-based index, for diagnostics only.
pub trait ExecutorFactory {
    type Executor: QueryExecutor + Send;

    fn open(&self, worker: usize) -> anyhow::Result<Self::Executor>;
}

impl<T: QueryExecutor + ?Sized> QueryExecutor for Box<T> {
    fn meta_query_style(&self) -> MetaQueryStyle {
        (**self).meta_query_style()
    }

    fn returns_rows(&mut self, sql: &str) -> Result<bool, ExecutionError> {
        (**self).returns_rows(sql)
    }
}

#[must_use]
pub fn build_meta_query(first: &str, second: &str, style: MetaQueryStyle) -> String {
    let first = embeddable(first);
    let second = embeddable(second);
    match style {
        MetaQueryStyle::Parenthesized => format!(
            "(({first}\n) EXCEPT ({second}\n)) UNION ALL (({second}\n) EXCEPT ({first}\n))"
        ),
        MetaQueryStyle::Subquery => format!(
            "SELECT * FROM ({}) AS \"a_minus_b\" UNION ALL SELECT * FROM ({}) AS \"b_minus_a\"",
            set_difference(first, second),
            set_difference(second, first),
        ),
    }
}

fn set_difference(left: &str, right: &str) -> String {
    format!("SELECT * FROM ({left}\n) AS \"lhs\" EXCEPT SELECT * FROM ({right}\n) AS \"rhs\"")
}

/// Drops one statement terminator. Operands are always closed on a fresh line
/// so a trailing line comment cannot swallow the parenthesis.
fn embeddable(query: &str) -> &str {
    let trimmed = query.trim_end();
    match trimmed.strip_suffix(';') {
        Some(statement) => statement.trim_end(),
        None => trimmed,
    }
}

pub fn check_equivalence<E>(executor: &mut E, first: &str, second: &str) -> Outcome
where
    E: QueryExecutor + ?Sized,
{
    let meta_query = build_meta_query(first, second, executor.meta_query_style());
    match executor.returns_rows(&meta_query) {
        Ok(false) => Outcome::Equivalent,
        Ok(true) => Outcome::NotEquivalent,
        Err(error) => Outcome::Error(error),
    }
}

#[cfg(test)]
mod tests {
    use super::{MetaQueryStyle, QueryExecutor, build_meta_query, check_equivalence};
    use crate::models::{ExecutionError, Outcome};

    struct ScriptedExecutor {
        response: Result<bool, ExecutionError>,
        seen: Vec<String>,
    }

    impl QueryExecutor for ScriptedExecutor {
        fn meta_query_style(&self) -> MetaQueryStyle {
            MetaQueryStyle::Parenthesized
        }

        fn returns_rows(&mut self, sql: &str) -> Result<bool, ExecutionError> {
            self.seen.push(sql.to_string());
            self.response.clone()
        }
    }

    #[test]
    fn parenthesized_meta_query_covers_both_directions() {
        assert_eq!(
            build_meta_query("SELECT 1", "SELECT 2", MetaQueryStyle::Parenthesized),
            "((SELECT 1\n) EXCEPT (SELECT 2\n)) UNION ALL ((SELECT 2\n) EXCEPT (SELECT 1\n))"
        );
    }

    #[test]
    fn subquery_meta_query_uses_aliased_derived_tables() {
        assert_eq!(
            build_meta_query("SELECT 1", "SELECT 2", MetaQueryStyle::Subquery),
            "SELECT * FROM (SELECT * FROM (SELECT 1\n) AS \"lhs\" EXCEPT SELECT * FROM (SELECT 2\n) AS \"rhs\") AS \"a_minus_b\" UNION ALL SELECT * FROM (SELECT * FROM (SELECT 2\n) AS \"lhs\" EXCEPT SELECT * FROM (SELECT 1\n) AS \"rhs\") AS \"b_minus_a\""
        );
    }

    #[test]
    fn trailing_terminators_are_dropped_before_embedding() {
        let query = build_meta_query("SELECT 1;\n", "SELECT 2 ;  \n", MetaQueryStyle::Parenthesized);
        assert_eq!(
            query,
            "((SELECT 1\n) EXCEPT (SELECT 2\n)) UNION ALL ((SELECT 2\n) EXCEPT (SELECT 1\n))"
        );
    }

    #[test]
    fn line_comment_on_last_line_stays_inside_its_operand() {
        let query = build_meta_query(
            "SELECT 1 -- generated by rule\n",
            "SELECT 1 -- generated by rule",
            MetaQueryStyle::Subquery,
        );
        for line in query.lines().filter(|line| line.contains("--")) {
            assert!(line.ends_with("-- generated by rule"), "comment swallowed text: {line}");
        }
    }

    #[test]
    fn outcome_follows_meta_query_rows() {
        let mut empty = ScriptedExecutor {
            response: Ok(false),
            seen: Vec::new(),
        };
        assert_eq!(check_equivalence(&mut empty, "SELECT 1", "SELECT 1"), Outcome::Equivalent);
        assert_eq!(empty.seen.len(), 1);

        let mut rows = ScriptedExecutor {
            response: Ok(true),
            seen: Vec::new(),
        };
        assert_eq!(check_equivalence(&mut rows, "SELECT 1", "SELECT 2"), Outcome::NotEquivalent);
    }

    #[test]
    fn execution_failures_are_errors_not_mismatches() {
        let mut failing = ScriptedExecutor {
            response: Err(ExecutionError::new("no such table: a")),
            seen: Vec::new(),
        };
        assert_eq!(
            check_equivalence(&mut failing, "SELECT * FROM a", "SELECT 1"),
            Outcome::Error(ExecutionError::new("no such table: a"))
        );
    }
}
