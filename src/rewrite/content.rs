//! Rewriting of URL references embedded in structured payloads.
//!
//! # Responsibilities
//! - Decide whether a body's content type is subject to a filter
//! - Select string fields with a small JSONPath subset
//! - Feed each selected string through the direction's rule set
//!
//! # JSONPath subset
//! `$` root, `.name` / `['name']` child, `..name` recursive descent,
//! `.*` any child, `[*]` any element, `[n]` element n.

use serde_json::Value as Json;

use crate::rewrite::{Direction, RewriteContext, RewriteError, RuleSet, Scope};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Field(String),
    Descend(String),
    AnyChild,
    AnyIndex,
    Index(usize),
}

/// A compiled selector over a JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    source: String,
    steps: Vec<Step>,
}

impl JsonPath {
    pub fn parse(source: &str) -> Result<Self, String> {
        let rest = source
            .trim()
            .strip_prefix('$')
            .ok_or_else(|| format!("JSON path '{}' must start with '$'", source))?;
        let chars: Vec<char> = rest.chars().collect();
        let mut steps = Vec::new();
        let mut i = 0;

        let read_name = |i: &mut usize| -> String {
            let start = *i;
            while *i < chars.len() && chars[*i] != '.' && chars[*i] != '[' {
                *i += 1;
            }
            chars[start..*i].iter().collect()
        };

        while i < chars.len() {
            match chars[i] {
                '.' if chars.get(i + 1) == Some(&'.') => {
                    i += 2;
                    let name = read_name(&mut i);
                    if name.is_empty() || name == "*" {
                        return Err(format!("'..' needs a field name in '{}'", source));
                    }
                    steps.push(Step::Descend(name));
                }
                '.' => {
                    i += 1;
                    let name = read_name(&mut i);
                    match name.as_str() {
                        "" => return Err(format!("empty field in '{}'", source)),
                        "*" => steps.push(Step::AnyChild),
                        _ => steps.push(Step::Field(name)),
                    }
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|&c| c == ']')
                        .map(|p| p + i)
                        .ok_or_else(|| format!("unterminated '[' in '{}'", source))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    let inner = inner.trim();
                    if inner == "*" {
                        steps.push(Step::AnyIndex);
                    } else if let Some(quoted) = inner
                        .strip_prefix('\'')
                        .and_then(|s| s.strip_suffix('\''))
                    {
                        steps.push(Step::Field(quoted.to_string()));
                    } else {
                        let idx = inner
                            .parse::<usize>()
                            .map_err(|_| format!("bad index '{}' in '{}'", inner, source))?;
                        steps.push(Step::Index(idx));
                    }
                    i = close + 1;
                }
                other => return Err(format!("unexpected '{}' in '{}'", other, source)),
            }
        }

        Ok(Self {
            source: source.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Call `f` on every string the path selects; `f` returns a replacement or `None`.
    pub fn for_each_string<F>(&self, root: &mut Json, f: &mut F) -> Result<usize, RewriteError>
    where
        F: FnMut(&str) -> Result<Option<String>, RewriteError>,
    {
        walk(root, &self.steps, f)
    }
}

fn walk<F>(node: &mut Json, steps: &[Step], f: &mut F) -> Result<usize, RewriteError>
where
    F: FnMut(&str) -> Result<Option<String>, RewriteError>,
{
    let Some((step, rest)) = steps.split_first() else {
        if let Json::String(s) = node {
            if let Some(replacement) = f(s.as_str())? {
                *s = replacement;
                return Ok(1);
            }
        }
        return Ok(0);
    };

    let mut count = 0;
    match step {
        Step::Field(name) => {
            if let Some(child) = node.get_mut(name.as_str()) {
                count += walk(child, rest, f)?;
            }
        }
        Step::Index(idx) => {
            if let Some(child) = node.get_mut(*idx) {
                count += walk(child, rest, f)?;
            }
        }
        Step::AnyIndex => {
            if let Json::Array(items) = node {
                for item in items {
                    count += walk(item, rest, f)?;
                }
            }
        }
        Step::AnyChild => match node {
            Json::Object(map) => {
                for child in map.values_mut() {
                    count += walk(child, rest, f)?;
                }
            }
            Json::Array(items) => {
                for item in items {
                    count += walk(item, rest, f)?;
                }
            }
            _ => {}
        },
        Step::Descend(name) => count += descend(node, name, rest, f)?,
    }
    Ok(count)
}

fn descend<F>(node: &mut Json, name: &str, rest: &[Step], f: &mut F) -> Result<usize, RewriteError>
where
    F: FnMut(&str) -> Result<Option<String>, RewriteError>,
{
    let mut count = 0;
    match node {
        Json::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == name {
                    count += walk(child, rest, f)?;
                }
                count += descend(child, name, rest, f)?;
            }
        }
        Json::Array(items) => {
            for item in items {
                count += descend(item, name, rest, f)?;
            }
        }
        _ => {}
    }
    Ok(count)
}

/// Match a media type against a glob such as `*/json` or `application/*`.
///
/// A `json` subtype glob also accepts structured suffixes like `vnd.api+json`.
pub fn media_type_matches(glob: &str, content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let Some((ty, sub)) = essence.split_once('/') else {
        return false;
    };
    let glob = glob.trim().to_ascii_lowercase();
    let Some((g_ty, g_sub)) = glob.split_once('/') else {
        return false;
    };

    let type_ok = g_ty == "*" || g_ty == ty;
    let sub_ok = g_sub == "*"
        || g_sub == sub
        || sub
            .rsplit_once('+')
            .is_some_and(|(_, suffix)| suffix == g_sub);
    type_ok && sub_ok
}

/// A compiled body filter from a dispatch contract.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    pub direction: Direction,
    pub types: Vec<String>,
    pub paths: Vec<JsonPath>,
    /// Restrict to one named rule; otherwise first match among body-scoped rules.
    pub rule: Option<String>,
}

impl ContentFilter {
    pub fn accepts(&self, direction: Direction, content_type: Option<&str>) -> bool {
        if direction != self.direction {
            return false;
        }
        match content_type {
            Some(ct) => self.types.iter().any(|g| media_type_matches(g, ct)),
            None => false,
        }
    }

    /// Rewrite `body`, returning `None` when nothing changed or the body is not JSON.
    pub fn rewrite_body(
        &self,
        body: &[u8],
        rules: &RuleSet,
        ctx: &RewriteContext,
    ) -> Result<Option<Vec<u8>>, RewriteError> {
        if body.is_empty() {
            return Ok(None);
        }
        let mut doc: Json = match serde_json::from_slice(body) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, "Body declared rewritable is not JSON; passing through");
                return Ok(None);
            }
        };

        let direction = self.direction;
        let mut rewrite_one = |s: &str| match &self.rule {
            Some(name) => rules.apply_named(name, s, ctx),
            None => rules.apply(direction, Scope::Body, s, ctx),
        };

        let mut changed = 0;
        for path in &self.paths {
            changed += path.for_each_string(&mut doc, &mut rewrite_one)?;
        }

        if changed == 0 {
            return Ok(None);
        }
        tracing::debug!(fields = changed, "Rewrote body references");
        Ok(Some(serde_json::to_vec(&doc)?))
    }
}
