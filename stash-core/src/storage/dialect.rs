//! SQL dialect compilation: one portable SQL string, two backends.
//!
//! Call sites write SQL using the portable `?` placeholder and the
//! SQLite-flavored `length(...)` / `excluded.col` spellings; [`Dialect`]
//! rewrites both for the networked backend before the query is sent.

/// Which physical database a query string is being compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Local, file-backed (or `:memory:`) SQLite.
    Sqlite,
    /// Networked PostgreSQL.
    Postgres,
}

impl Dialect {
    /// Rewrite a portable SQL string for this dialect. A no-op for SQLite.
    pub fn compile(&self, sql: &str) -> String {
        match self {
            Dialect::Sqlite => sql.to_string(),
            Dialect::Postgres => rewrite_placeholders(&rewrite_functions(sql)),
        }
    }

    /// The column type used for binary blobs.
    pub fn blob_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "BLOB",
            Dialect::Postgres => "BYTEA",
        }
    }

    /// The column type used for timestamps.
    pub fn timestamp_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "DATETIME",
            Dialect::Postgres => "TIMESTAMPTZ",
        }
    }
}

/// `?` -> `$1`, `$2`, … in positional order. Ignores `?` inside single-quoted
/// string literals so literal question marks in data never get rewritten.
fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_string = false;
    let mut n = 0usize;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                out.push(ch);
            }
            '?' if !in_string => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}

/// `length(` -> `octet_length(`, `excluded.` -> `EXCLUDED.`.
fn rewrite_functions(sql: &str) -> String {
    sql.replace("length(", "octet_length(")
        .replace("excluded.", "EXCLUDED.")
}
