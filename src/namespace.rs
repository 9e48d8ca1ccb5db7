// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Namespace scoping.
//!
//! A namespace is a `(database, collection)` pair written `db.collection`.
//! The [`NamespaceFilter`] is compiled once per session from the namespaces
//! the source reports at start-up and the configured patterns, and is then
//! an immutable, side-effect-free predicate.
//!
//! # Patterns
//!
//! ```text
//! *            every database
//! app          every collection in `app`
//! app.*        same as above
//! app.users    one collection
//! *.events     `events` in every database
//! shop_*.ord*  wildcards anywhere
//! ```
//!
//! # Reserved Namespaces
//!
//! The `admin`, `local` and `config` databases and every `system.*`
//! collection belong to the store itself. They never match, whatever the
//! patterns say.

use crate::error::{Result, SyncError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Databases reserved by the store.
pub const RESERVED_DATABASES: [&str; 3] = ["admin", "local", "config"];

/// Collection prefix reserved by the store.
const SYSTEM_COLLECTION_PREFIX: &str = "system.";

/// A `(database, collection)` pair.
///
/// The default (both parts empty) is the namespace of no-op records.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Parse `db.collection`, splitting on the first dot.
    ///
    /// Collection names may themselves contain dots (`db.system.indexes`).
    /// A bare database name (no dot) is accepted with an empty collection.
    pub fn parse(s: &str) -> Option<Self> {
        let (database, collection) = match s.split_once('.') {
            Some((db, coll)) => (db, coll),
            None => (s, ""),
        };
        if database.is_empty() {
            return None;
        }
        Some(Self::new(database, collection))
    }

    /// Whether this namespace belongs to the store itself.
    pub fn is_reserved(&self) -> bool {
        RESERVED_DATABASES.contains(&self.database.as_str())
            || self.collection.starts_with(SYSTEM_COLLECTION_PREFIX)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.collection.is_empty() {
            write!(f, "{}", self.database)
        } else {
            write!(f, "{}.{}", self.database, self.collection)
        }
    }
}

/// A compiled inclusion pattern.
#[derive(Debug, Clone)]
pub struct NamespacePattern {
    raw: String,
    database: Regex,
    collection: Option<Regex>,
}

impl NamespacePattern {
    /// The pattern as configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Test a namespace against this pattern (ignores reservation).
    pub fn matches(&self, ns: &Namespace) -> bool {
        if !self.database.is_match(&ns.database) {
            return false;
        }
        match self.collection {
            Some(ref coll) => coll.is_match(&ns.collection),
            None => true,
        }
    }
}

impl FromStr for NamespacePattern {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(SyncError::Config("empty namespace pattern".to_string()));
        }

        let (db, coll) = match raw.split_once('.') {
            Some((db, coll)) => (db, Some(coll)),
            None => (raw, None),
        };
        if db.is_empty() || coll.is_some_and(str::is_empty) {
            return Err(SyncError::Config(format!(
                "invalid namespace pattern '{}'",
                raw
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            database: glob_to_regex(db)?,
            // `app.*` narrows nothing
            collection: coll.filter(|c| *c != "*").map(glob_to_regex).transpose()?,
        })
    }
}

/// Translate a `*` glob into an anchored regex.
fn glob_to_regex(glob: &str) -> Result<Regex> {
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
        .map_err(|e| SyncError::Config(format!("invalid namespace pattern '{}': {}", glob, e)))
}

/// Inclusion test for change records.
#[derive(Debug, Clone)]
pub struct NamespaceFilter {
    patterns: Vec<NamespacePattern>,
    databases: BTreeSet<String>,
}

impl NamespaceFilter {
    /// Compile a filter from the namespaces known at session start.
    ///
    /// A database is included when at least one of its known, non-reserved
    /// namespaces matches a pattern. An empty inclusion set is a
    /// configuration error: replicating nothing is never a valid steady
    /// state.
    pub fn compile<S: AsRef<str>>(known: &[Namespace], patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| p.as_ref().parse::<NamespacePattern>())
            .collect::<Result<Vec<_>>>()?;

        if patterns.is_empty() {
            return Err(SyncError::Config(
                "no namespace patterns configured".to_string(),
            ));
        }

        let databases: BTreeSet<String> = known
            .iter()
            .filter(|ns| !ns.is_reserved())
            .filter(|ns| patterns.iter().any(|p| p.matches(ns)))
            .map(|ns| ns.database.clone())
            .collect();

        if databases.is_empty() {
            return Err(SyncError::Config(format!(
                "no databases in scope: {} known namespaces, patterns [{}]",
                known.len(),
                patterns
                    .iter()
                    .map(NamespacePattern::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        info!(
            databases = ?databases,
            patterns = patterns.len(),
            "Compiled namespace filter"
        );

        Ok(Self {
            patterns,
            databases,
        })
    }

    /// Whether records in `ns` are in scope.
    pub fn matches(&self, ns: &Namespace) -> bool {
        if ns.is_reserved() {
            return false;
        }
        if !self.databases.contains(&ns.database) {
            debug!(ns = %ns, "Database not in inclusion set");
            return false;
        }
        self.patterns.iter().any(|p| p.matches(ns))
    }

    /// Databases in the inclusion set.
    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.databases.iter().map(String::as_str)
    }
}
