//! SQL risk classification
//!
//! `createApprovalRequest` needs a risk class for a script's SQL to pick the
//! required approver ranks. The real deployment may plug in the full SQL
//! safety classifier through [`ScriptClassifier`]; [`SqlRiskClassifier`] is
//! the shipped default, a comment-stripping leading-keyword scan that errs
//! on the side of the higher risk class.

use crate::types::ScriptType;
use regex::Regex;

/// Seam for the external SQL safety classifier.
pub trait ScriptClassifier: Send + Sync {
    /// Risk class for `sql_content`.
    fn classify(&self, sql_content: &str) -> ScriptType;
}

/// Default keyword-based classifier.
///
/// Statements are scanned individually; the riskiest statement decides the
/// class for the whole script.
#[derive(Debug, Default)]
pub struct SqlRiskClassifier;

impl SqlRiskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Remove `-- line` and `/* block */` comments plus string literals so
    /// keywords inside them cannot skew the scan.
    fn sanitize(sql: &str) -> String {
        let mut cleaned = sql.to_string();
        for pattern in [r"--[^\n]*", r"(?s)/\*.*?\*/", r"'[^']*'", r#""[^"]*""#] {
            if let Ok(re) = Regex::new(pattern) {
                cleaned = re.replace_all(&cleaned, " ").into_owned();
            }
        }
        cleaned
    }

    fn classify_statement(statement: &str) -> ScriptType {
        let upper = statement.trim().to_uppercase();
        let mut words = upper.split_whitespace();
        let Some(first) = words.next() else {
            return ScriptType::ReadQuery;
        };
        let second = words.next().unwrap_or("");

        match first {
            "GRANT" | "REVOKE" | "SET" | "FLUSH" | "SHUTDOWN" | "KILL" | "RESET" => {
                ScriptType::SystemChange
            }
            // user administration outranks plain DDL
            "CREATE" | "DROP" | "ALTER" if second == "USER" || second == "ROLE" => {
                ScriptType::SystemChange
            }
            "CREATE" | "DROP" | "ALTER" | "TRUNCATE" | "RENAME" => ScriptType::StructureChange,
            "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "REPLACE" | "LOAD" | "CALL" => {
                ScriptType::DataChange
            }
            _ => ScriptType::ReadQuery,
        }
    }
}

impl ScriptClassifier for SqlRiskClassifier {
    fn classify(&self, sql_content: &str) -> ScriptType {
        let cleaned = Self::sanitize(sql_content);

        cleaned
            .split(';')
            .map(Self::classify_statement)
            .max_by_key(|t| match t {
                ScriptType::ReadQuery => 0,
                ScriptType::DataChange => 1,
                ScriptType::StructureChange => 2,
                ScriptType::SystemChange => 3,
            })
            .unwrap_or(ScriptType::ReadQuery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(sql: &str) -> ScriptType {
        SqlRiskClassifier::new().classify(sql)
    }

    #[test]
    fn test_plain_select_is_read_query() {
        assert_eq!(classify("SELECT id, name FROM users"), ScriptType::ReadQuery);
        assert_eq!(classify("show tables"), ScriptType::ReadQuery);
        assert_eq!(classify("EXPLAIN SELECT * FROM t"), ScriptType::ReadQuery);
    }

    #[test]
    fn test_dml_is_data_change() {
        assert_eq!(
            classify("UPDATE users SET active = 0 WHERE id = 1"),
            ScriptType::DataChange
        );
        assert_eq!(classify("delete from audit_log"), ScriptType::DataChange);
    }

    #[test]
    fn test_ddl_is_structure_change() {
        assert_eq!(classify("DROP TABLE old_orders"), ScriptType::StructureChange);
        assert_eq!(
            classify("ALTER TABLE users ADD COLUMN phone TEXT"),
            ScriptType::StructureChange
        );
        assert_eq!(classify("TRUNCATE sessions"), ScriptType::StructureChange);
    }

    #[test]
    fn test_privileges_are_system_change() {
        assert_eq!(
            classify("GRANT SELECT ON db.* TO 'bob'@'%'"),
            ScriptType::SystemChange
        );
        assert_eq!(classify("CREATE USER reporting"), ScriptType::SystemChange);
        assert_eq!(classify("DROP ROLE auditor"), ScriptType::SystemChange);
    }

    #[test]
    fn test_riskiest_statement_wins() {
        let sql = "SELECT count(*) FROM users; DELETE FROM users WHERE stale = 1";
        assert_eq!(classify(sql), ScriptType::DataChange);

        let sql = "INSERT INTO t VALUES (1); DROP TABLE t";
        assert_eq!(classify(sql), ScriptType::StructureChange);
    }

    #[test]
    fn test_keywords_in_comments_and_strings_ignored() {
        let sql = "SELECT note FROM log -- do not DELETE this\nWHERE note <> 'DROP TABLE users'";
        assert_eq!(classify(sql), ScriptType::ReadQuery);

        let sql = "/* TRUNCATE happens elsewhere */ SELECT 1";
        assert_eq!(classify(sql), ScriptType::ReadQuery);
    }

    #[test]
    fn test_empty_input_defaults_to_read_query() {
        assert_eq!(classify(""), ScriptType::ReadQuery);
        assert_eq!(classify("   ;  ; "), ScriptType::ReadQuery);
    }
}
