// src/core/selector/mod.rs

//! The label query engine.
//!
//! A selector is a conjunction of atoms (`k`, `!k`, `k=v`, `k!=v`,
//! `k in (v1,v2)`) joined by commas; multiple selectors compose with OR at
//! the watch/list boundary. Atoms are parsed once and stored; evaluation
//! short-circuits on the first failing atom.

use serde::{Deserialize, Serialize};

use crate::core::Error;
use crate::core::resource::Labels;

/// One parsed selector atom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Atom {
    Exists(String),
    NotExists(String),
    Eq(String, String),
    NotEq(String, String),
    In(String, Vec<String>),
}

impl Atom {
    fn matches(&self, labels: &Labels) -> bool {
        match self {
            Atom::Exists(key) => labels.contains(key),
            Atom::NotExists(key) => !labels.contains(key),
            Atom::Eq(key, value) => labels.get(key) == Some(value.as_str()),
            Atom::NotEq(key, value) => labels.get(key) != Some(value.as_str()),
            Atom::In(key, values) => labels
                .get(key)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
        }
    }

    fn key(&self) -> &str {
        match self {
            Atom::Exists(key)
            | Atom::NotExists(key)
            | Atom::Eq(key, _)
            | Atom::NotEq(key, _)
            | Atom::In(key, _) => key,
        }
    }
}

/// A conjunction of atoms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    atoms: Vec<Atom>,
}

impl Selector {
    /// An empty selector matching every label set.
    pub fn all() -> Self {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Parses a comma-joined conjunction. Commas inside `in (…)` value
    /// lists do not split atoms.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut atoms = Vec::new();
        for raw in split_top_level(input) {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            atoms.push(parse_atom(raw)?);
        }
        Ok(Self { atoms })
    }

    /// Builds a single-atom equality selector.
    pub fn field_eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            atoms: vec![Atom::Eq(key.into(), value.into())],
        }
    }

    /// Builds a single-atom presence selector.
    pub fn has(key: impl Into<String>) -> Self {
        Self {
            atoms: vec![Atom::Exists(key.into())],
        }
    }

    /// Adds an equality atom to the conjunction.
    pub fn and_eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.atoms.push(Atom::Eq(key.into(), value.into()));
        self
    }

    /// Adds a presence atom to the conjunction.
    pub fn and_has(mut self, key: impl Into<String>) -> Self {
        self.atoms.push(Atom::Exists(key.into()));
        self
    }

    /// Adds an absence atom to the conjunction.
    pub fn and_missing(mut self, key: impl Into<String>) -> Self {
        self.atoms.push(Atom::NotExists(key.into()));
        self
    }

    /// Conjunction over all atoms, short-circuiting on the first failure.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.atoms.iter().all(|atom| atom.matches(labels))
    }
}

/// OR-composition of selectors at the watch/list boundary.
/// An empty set matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectors(Vec<Selector>);

impl Selectors {
    pub fn all() -> Self {
        Default::default()
    }

    pub fn one(selector: Selector) -> Self {
        Self(vec![selector])
    }

    pub fn parse_any(inputs: &[String]) -> Result<Self, Error> {
        let mut out = Vec::with_capacity(inputs.len());
        for input in inputs {
            out.push(Selector::parse(input)?);
        }
        Ok(Self(out))
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.0.is_empty() || self.0.iter().any(|s| s.matches(labels))
    }
}

impl From<Selector> for Selectors {
    fn from(selector: Selector) -> Self {
        Selectors::one(selector)
    }
}

/// Splits on commas that are not nested inside parentheses.
fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_atom(raw: &str) -> Result<Atom, Error> {
    let atom = if let Some(key) = raw.strip_prefix('!') {
        Atom::NotExists(key.trim().to_string())
    } else if let Some((key, values)) = parse_in(raw)? {
        Atom::In(key, values)
    } else if let Some((key, value)) = raw.split_once("!=") {
        Atom::NotEq(key.trim().to_string(), value.trim().to_string())
    } else if let Some((key, value)) = raw.split_once('=') {
        Atom::Eq(key.trim().to_string(), value.trim().to_string())
    } else {
        Atom::Exists(raw.to_string())
    };

    validate_key(atom.key())?;
    Ok(atom)
}

/// Recognizes `key in (v1, v2, …)`.
fn parse_in(raw: &str) -> Result<Option<(String, Vec<String>)>, Error> {
    let Some(open) = raw.find('(') else {
        return Ok(None);
    };
    let head = raw[..open].trim_end();
    let Some(key) = head.strip_suffix(" in").map(str::trim) else {
        return Ok(None);
    };
    let Some(tail) = raw[open + 1..].strip_suffix(')') else {
        return Err(Error::InvalidArgument(format!(
            "unterminated value list in selector atom '{raw}'"
        )));
    };
    let values: Vec<String> = tail
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "empty value list in selector atom '{raw}'"
        )));
    }
    Ok(Some((key.to_string(), values)))
}

fn validate_key(key: &str) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("empty selector key".to_string()));
    }
    if key.chars().any(|c| c.is_whitespace() || "(),=!".contains(c)) {
        return Err(Error::InvalidArgument(format!(
            "invalid character in selector key '{key}'"
        )));
    }
    Ok(())
}
