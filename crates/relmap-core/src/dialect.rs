//! SQL dialect abstraction.
//!
//! The engines render abstract SQL with `?` placeholders and an ordered
//! parameter list; the dialect rewrites it into target form and owns the
//! identifier-length rules.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Hex digits of identifier hash kept when shortening.
const HASH_SUFFIX_LEN: usize = 12;

/// How a dialect surfaces a database-generated primary key after INSERT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyReadback {
    /// Append `RETURNING <pk>` to the INSERT itself.
    Returning,
    /// Issue a follow-up `SELECT LAST_INSERT_ID()`.
    LastInsertId,
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// MySQL: `?` placeholders, 64-character identifiers.
    #[default]
    MySql,
    /// PostgreSQL: `$n` placeholders, 63-character identifiers.
    Postgres,
}

impl Dialect {
    /// Maximum identifier length in bytes.
    pub fn max_identifier_len(self) -> usize {
        match self {
            Dialect::MySql => 64,
            Dialect::Postgres => 63,
        }
    }

    /// How generated keys are read back after an INSERT.
    pub fn key_readback(self) -> KeyReadback {
        match self {
            Dialect::MySql => KeyReadback::LastInsertId,
            Dialect::Postgres => KeyReadback::Returning,
        }
    }

    /// Rewrite abstract `?`-placeholder SQL into target form.
    ///
    /// Criteria values never travel inline in the SQL text, so a plain
    /// character scan is sufficient; there are no string literals to
    /// protect.
    pub fn finalize_sql(self, sql: &str) -> String {
        match self {
            Dialect::MySql => sql.to_string(),
            Dialect::Postgres => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut n = 0usize;
                for ch in sql.chars() {
                    if ch == '?' {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
        }
    }

    /// Deterministically shorten an identifier to the dialect limit.
    ///
    /// Over-long names keep a prefix and gain a `_`-separated blake3 hash
    /// suffix of the full name, so distinct long names never collide and
    /// repeated compilations of the same query shape produce the same
    /// aliases.
    pub fn fit_identifier(self, ident: &str) -> String {
        let max = self.max_identifier_len();
        if ident.len() <= max {
            return ident.to_string();
        }
        let digest = blake3::hash(ident.as_bytes());
        let suffix = hex::encode(&digest.as_bytes()[..HASH_SUFFIX_LEN / 2]);
        let mut keep = max - suffix.len() - 1;
        // The cut is in bytes; back up to a char boundary so multi-byte
        // names truncate cleanly.
        while !ident.is_char_boundary(keep) {
            keep -= 1;
        }
        format!("{}_{}", &ident[..keep], suffix)
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(Dialect::MySql),
            "postgres" => Ok(Dialect::Postgres),
            other => Err(Error::Invariant(format!("unknown dialect: {other}"))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MySql => f.write_str("mysql"),
            Dialect::Postgres => f.write_str("postgres"),
        }
    }
}
