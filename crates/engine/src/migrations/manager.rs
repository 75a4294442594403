//! Migration Manager - loading and parsing migration files
//!
//! Files are named `<timestamp>_<name>.sql` and split into `-- Up` and
//! `-- Down` sections. Statements are separated with the vendor's SQL parser.

use std::fs;
use std::path::Path;

use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

use super::definitions::{Migration, MigrationConfig};
use crate::backends::DatabaseBackendType;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct MigrationManager {
    config: MigrationConfig,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Up,
    Down,
}

impl MigrationManager {
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Load every `.sql` file in the migrations directory, ordered by id.
    ///
    /// A missing directory means there is nothing to replay.
    pub fn load_migrations(&self) -> EngineResult<Vec<Migration>> {
        let dir = &self.config.migrations_dir;
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "Migrations directory does not exist");
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(dir)
            .map_err(|e| EngineError::Migration(format!("Failed to read migrations directory: {}", e)))?;

        let mut migrations = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| EngineError::Migration(format!("Failed to read directory entry: {}", e)))?
                .path();

            if path.extension().is_some_and(|ext| ext == "sql") {
                migrations.push(self.parse_migration_file(&path)?);
            }
        }

        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(migrations)
    }

    fn parse_migration_file(&self, path: &Path) -> EngineResult<Migration> {
        let content = fs::read_to_string(path)
            .map_err(|e| EngineError::Migration(format!("Failed to read {}: {}", path.display(), e)))?;

        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EngineError::Migration(format!("Invalid migration filename: {}", path.display())))?
            .to_string();

        let parts: Vec<&str> = id.split('_').collect();
        if parts.len() < 2 {
            return Err(EngineError::Migration(format!(
                "Migration filename must follow format timestamp_name: {}",
                id
            )));
        }

        // YYYYMMDD_HHMMSS_name or timestamp_name
        let name = if parts.len() >= 3 && parts[0].len() == 8 && parts[1].len() == 6 {
            parts[2..].join(" ")
        } else {
            parts[1..].join(" ")
        };

        let (up_sql, down_sql) = Self::parse_migration_content(&content);

        Ok(Migration {
            id,
            name,
            up_sql,
            down_sql,
        })
    }

    /// Extract the UP and DOWN sections; comment lines are dropped
    pub fn parse_migration_content(content: &str) -> (String, String) {
        let mut up_sql = Vec::new();
        let mut down_sql = Vec::new();
        let mut section = Section::Preamble;

        for line in content.lines() {
            let trimmed = line.trim();

            if let Some(comment) = trimmed.strip_prefix("--") {
                let words: Vec<String> = comment
                    .split_whitespace()
                    .map(|word| word.trim_end_matches(':').to_lowercase())
                    .collect();
                match words.first().map(String::as_str) {
                    Some("up") => section = Section::Up,
                    Some("down") => section = Section::Down,
                    _ => {}
                }
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }

            match section {
                Section::Up => up_sql.push(line),
                Section::Down => down_sql.push(line),
                Section::Preamble => {}
            }
        }

        (
            up_sql.join("\n").trim().to_string(),
            down_sql.join("\n").trim().to_string(),
        )
    }

    /// Split a script into individual statements using the vendor's grammar,
    /// falling back to block-aware semicolon splitting when the parser rejects it
    pub fn split_sql_statements(sql: &str, backend: DatabaseBackendType) -> Vec<String> {
        let dialect: Box<dyn Dialect> = match backend {
            DatabaseBackendType::PostgreSQL => Box::new(PostgreSqlDialect {}),
            DatabaseBackendType::MySQL => Box::new(MySqlDialect {}),
            DatabaseBackendType::SQLite => Box::new(SQLiteDialect {}),
        };

        match Parser::parse_sql(dialect.as_ref(), sql) {
            Ok(statements) => statements.iter().map(ToString::to_string).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "SQL parsing failed, splitting on top-level semicolons");
                fallback_split(sql)
            }
        }
    }
}

/// Split on top-level semicolons only. Quoted text, comments, dollar-quoted
/// bodies and the `BEGIN ... END` / `CASE ... END` blocks of a `CREATE`
/// statement are kept whole, so trigger and routine bodies survive.
fn fallback_split(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut first_word: Option<String> = None;
    let mut after_end = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                i = skip_quoted(&chars, i, c);
                continue;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                i = find_from(&chars, i, &['\n']).unwrap_or(chars.len());
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i = find_from(&chars, i + 2, &['*', '/']).map_or(chars.len(), |end| end + 2);
                continue;
            }
            '$' => {
                if let Some(tag) = dollar_tag(&chars, i) {
                    i = find_from(&chars, i + tag.len(), &tag).map_or(chars.len(), |end| end + tag.len());
                    continue;
                }
            }
            ';' if depth == 0 => {
                push_statement(&mut statements, &chars[start..i]);
                start = i + 1;
                first_word = None;
                after_end = false;
            }
            ';' => after_end = false,
            c if c.is_alphabetic() || c == '_' => {
                let end = chars[i..]
                    .iter()
                    .position(|c| !(c.is_alphanumeric() || *c == '_'))
                    .map_or(chars.len(), |offset| i + offset);
                let word = chars[i..end].iter().collect::<String>().to_uppercase();

                let creating = first_word.get_or_insert_with(|| word.clone()).as_str() == "CREATE";
                if after_end {
                    after_end = false;
                    // `END IF`, `END LOOP` ... close blocks that were never counted
                    if matches!(word.as_str(), "IF" | "LOOP" | "WHILE" | "REPEAT") {
                        depth += 1;
                    }
                }
                if creating {
                    match word.as_str() {
                        "BEGIN" | "CASE" => depth += 1,
                        "END" => {
                            after_end = depth > 0;
                            depth = depth.saturating_sub(1);
                        }
                        _ => {}
                    }
                }

                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    push_statement(&mut statements, &chars[start..]);
    statements
}

fn push_statement(statements: &mut Vec<String>, chars: &[char]) {
    let statement = chars.iter().collect::<String>();
    let statement = statement.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
}

/// Index just past the closing quote; doubled quotes are escapes
fn skip_quoted(chars: &[char], open: usize, quote: char) -> usize {
    let mut i = open + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// `$$` or `$tag$` starting at `at`; positional parameters like `$1` are not tags
fn dollar_tag(chars: &[char], at: usize) -> Option<Vec<char>> {
    if chars.get(at + 1).is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    let close = chars[at + 1..]
        .iter()
        .position(|c| !(c.is_alphanumeric() || *c == '_'))
        .map(|offset| at + 1 + offset)?;
    (chars[close] == '$').then(|| chars[at..=close].to_vec())
}

fn find_from(chars: &[char], from: usize, needle: &[char]) -> Option<usize> {
    if from >= chars.len() {
        return None;
    }
    chars[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_are_separated() {
        let content = "-- Migration: create users\n\
                       -- Up migration\n\
                       CREATE TABLE users (id INTEGER PRIMARY KEY);\n\
                       \n\
                       -- Down migration\n\
                       DROP TABLE users;\n";

        let (up, down) = MigrationManager::parse_migration_content(content);
        assert_eq!(up, "CREATE TABLE users (id INTEGER PRIMARY KEY);");
        assert_eq!(down, "DROP TABLE users;");
    }

    #[test]
    fn test_split_statements_per_dialect() {
        let sql = "CREATE TABLE a (id INTEGER PRIMARY KEY); CREATE TABLE b (id INTEGER PRIMARY KEY)";
        let statements = MigrationManager::split_sql_statements(sql, DatabaseBackendType::SQLite);
        assert_eq!(statements.len(), 2);
        assert!(statements[1].starts_with("CREATE TABLE b"));
    }

    #[test]
    fn test_unparseable_sql_falls_back_to_semicolons() {
        let sql = "FROBNICATE everything; FROBNICATE more;";
        assert_eq!(
            MigrationManager::split_sql_statements(sql, DatabaseBackendType::PostgreSQL),
            vec!["FROBNICATE everything", "FROBNICATE more"]
        );
    }

    #[test]
    fn test_trigger_body_stays_in_one_statement() {
        let sql = "CREATE TABLE a (id INTEGER PRIMARY KEY, n INTEGER);\n\
                   CREATE TRIGGER a_bump AFTER INSERT ON a BEGIN UPDATE a SET n = 1 WHERE id = NEW.id; END;";

        let statements = MigrationManager::split_sql_statements(sql, DatabaseBackendType::SQLite);
        assert_eq!(statements.len(), 2);
        assert!(statements[1].starts_with("CREATE TRIGGER a_bump"));
        assert!(statements[1].ends_with("END"));
    }

    #[test]
    fn test_fallback_ignores_semicolons_in_quotes_and_comments() {
        let sql = "INSERT INTO notes VALUES ('a;b', 'it''s; fine'); -- trailing; comment\n\
                   /* block; comment */ INSERT INTO \"odd;name\" VALUES (1)";

        let statements = fallback_split(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "INSERT INTO notes VALUES ('a;b', 'it''s; fine')");
        assert!(statements[1].ends_with(r#"INSERT INTO "odd;name" VALUES (1)"#));
    }

    #[test]
    fn test_fallback_keeps_dollar_quoted_bodies() {
        let sql = "CREATE FUNCTION bump() RETURNS trigger AS $body$ BEGIN NEW.n := 1; RETURN NEW; END; $body$ LANGUAGE plpgsql;\n\
                   SELECT $1";

        let statements = fallback_split(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("LANGUAGE plpgsql"));
        assert_eq!(statements[1], "SELECT $1");
    }

    #[test]
    fn test_fallback_handles_nested_routine_blocks() {
        let sql = "CREATE PROCEDURE tidy() BEGIN IF 1 = 1 THEN DELETE FROM t; END IF; \
                   SELECT CASE WHEN 1 THEN 2 END; END; DROP TABLE t";

        let statements = fallback_split(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("END; END"));
        assert_eq!(statements[1], "DROP TABLE t");
    }

    #[test]
    fn test_load_orders_by_id_and_names_from_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("20240201_090000_add_posts.sql"),
            "-- Up\nCREATE TABLE posts (id INTEGER);\n-- Down\nDROP TABLE posts;\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20240101_090000_create_users.sql"),
            "-- Up\nCREATE TABLE users (id INTEGER);\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let manager = MigrationManager::new(MigrationConfig {
            migrations_dir: dir.path().to_path_buf(),
            migrations_table: "dbfresh_migrations".to_string(),
        });
        let migrations = manager.load_migrations().unwrap();

        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].id, "20240101_090000_create_users");
        assert_eq!(migrations[0].name, "create users");
        assert_eq!(migrations[1].down_sql, "DROP TABLE posts;");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let manager = MigrationManager::new(MigrationConfig {
            migrations_dir: "/definitely/not/here".into(),
            migrations_table: "m".to_string(),
        });
        assert!(manager.load_migrations().unwrap().is_empty());
    }
}
