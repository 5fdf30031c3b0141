//! Kubernetes label-selector expressions.
//!
//! Supports the string form accepted by `kubectl -l`:
//! `k=v`, `k==v`, `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k`, `!k`,
//! joined by commas. The empty selector matches everything.

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid label selector {selector:?}: {reason}")]
pub struct LabelSelectorError {
    pub selector: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, vs) => labels.get(k).is_some_and(|v| vs.contains(v)),
            Requirement::NotIn(k, vs) => labels.get(k).is_none_or(|v| !vs.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// A parsed label selector: the conjunction of its requirements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector that matches every label set.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = LabelSelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| LabelSelectorError {
            selector: s.to_string(),
            reason: reason.to_string(),
        };

        if s.trim().is_empty() {
            return Ok(Self::everything());
        }

        let mut requirements = Vec::new();
        for term in split_terms(s).map_err(|r| err(r))? {
            let term = term.trim();
            if term.is_empty() {
                return Err(err("empty requirement"));
            }
            requirements.push(parse_requirement(term).map_err(|r| err(&r))?);
        }
        Ok(Self { requirements })
    }
}

/// Split on commas that are not inside a `( ... )` value list.
fn split_terms(s: &str) -> Result<Vec<&str>, &'static str> {
    let mut terms = Vec::new();
    let mut depth = 0u32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1).ok_or("unbalanced parentheses")?,
            ',' if depth == 0 => {
                terms.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced parentheses");
    }
    terms.push(&s[start..]);
    Ok(terms)
}

fn parse_requirement(term: &str) -> Result<Requirement, String> {
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(key_token(key)?));
    }

    if let Some(open) = term.find('(') {
        let head: Vec<&str> = term[..open].split_whitespace().collect();
        let [key, op] = head.as_slice() else {
            return Err(format!("expected `key in (...)` or `key notin (...)`, got {term:?}"));
        };
        let list = term[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| format!("missing closing parenthesis in {term:?}"))?;
        let values = list
            .split(',')
            .map(|v| value_token(v.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        if values.is_empty() || values.iter().all(String::is_empty) {
            return Err(format!("empty value set in {term:?}"));
        }
        let key = key_token(key)?;
        return match *op {
            "in" => Ok(Requirement::In(key, values)),
            "notin" => Ok(Requirement::NotIn(key, values)),
            other => Err(format!("unknown set operator {other:?}")),
        };
    }

    if let Some((k, v)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(key_token(k)?, value_token(v.trim())?));
    }
    if let Some((k, v)) = term.split_once("==") {
        return Ok(Requirement::Equals(key_token(k)?, value_token(v.trim())?));
    }
    if let Some((k, v)) = term.split_once('=') {
        return Ok(Requirement::Equals(key_token(k)?, value_token(v.trim())?));
    }

    Ok(Requirement::Exists(key_token(term)?))
}

fn key_token(raw: &str) -> Result<String, String> {
    let key = raw.trim();
    if key.is_empty() {
        return Err("empty key".to_string());
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(format!("invalid key {key:?}"));
    }
    Ok(key.to_string())
}

fn value_token(value: &str) -> Result<String, String> {
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(format!("invalid value {value:?}"));
    }
    Ok(value.to_string())
}
