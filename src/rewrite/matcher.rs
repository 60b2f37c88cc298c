//! Segment matching of subjects against pattern templates.
//!
//! # Design Decisions
//! - Subjects are split structurally (scheme, host, port, path segments, query pairs)
//! - Matching is exact-segment or wildcard per segment; no regex
//! - `**` and `{name=**}` match lazily (fewest segments first) with backtracking
//! - Scheme and host compare case-insensitively, everything else exactly

use crate::rewrite::template::{Origin, Part, QueryItem, Segment, Template, Value};

/// A URL-ish string split into the pieces templates talk about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub segments: Vec<String>,
    pub trailing_slash: bool,
    pub query: Vec<(String, Option<String>)>,
    pub fragment: Option<String>,
}

impl Subject {
    /// Split a subject. Anything without `scheme://` is treated as a path.
    pub fn parse(raw: &str) -> Self {
        let (raw, fragment) = match raw.split_once('#') {
            Some((before, frag)) => (before, Some(frag.to_string())),
            None => (raw, None),
        };
        let (before_query, query) = match raw.split_once('?') {
            Some((before, q)) => (before, parse_query(q)),
            None => (raw, Vec::new()),
        };

        let (scheme, host, port, path) = match split_absolute(before_query) {
            Some((scheme, authority, path)) => {
                let (host, port) = split_authority(authority);
                (Some(scheme.to_string()), Some(host.to_string()), port.map(str::to_string), path)
            }
            None => (None, None, None, before_query),
        };

        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let trailing_slash = path.len() > 1 && path.ends_with('/');

        Self {
            scheme,
            host,
            port,
            segments,
            trailing_slash,
            query,
            fragment,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.host.is_some()
    }

    /// Port, falling back to the scheme's well-known port.
    fn effective_port(&self) -> Option<&str> {
        self.port.as_deref().or(match self.scheme.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("http") => Some("80"),
            Some(s) if s.eq_ignore_ascii_case("https") => Some("443"),
            _ => None,
        })
    }
}

fn split_absolute(raw: &str) -> Option<(&str, &str, &str)> {
    let idx = raw.find("://")?;
    let scheme = &raw[..idx];
    let valid_scheme = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid_scheme {
        return None;
    }
    let rest = &raw[idx + 3..];
    let auth_end = rest.find('/').unwrap_or(rest.len());
    Some((scheme, &rest[..auth_end], &rest[auth_end..]))
}

fn split_authority(authority: &str) -> (&str, Option<&str>) {
    // Credentials never take part in matching.
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
    if authority.starts_with('[') {
        if let Some(close) = authority.find(']') {
            let port = authority[close + 1..].strip_prefix(':');
            return (&authority[..=close], port);
        }
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    }
}

pub(crate) fn parse_query(raw: &str) -> Vec<(String, Option<String>)> {
    raw.split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), Some(v.to_string())),
            None => (pair.to_string(), None),
        })
        .collect()
}

/// A value bound by a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    Segment(String),
    Segments(Vec<String>),
    Param(Option<String>),
}

impl Captured {
    /// Text form used when the capture lands somewhere other than a path.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Captured::Segment(s) => Some(s.clone()),
            Captured::Segments(segs) => Some(segs.join("/")),
            Captured::Param(v) => v.clone(),
        }
    }
}

/// Everything a successful match binds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    values: Vec<(String, Captured)>,
    pub rest_query: Vec<(String, Option<String>)>,
    pub trailing_slash: bool,
    pub fragment: Option<String>,
}

impl Captures {
    pub fn get(&self, name: &str) -> Option<&Captured> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn push(&mut self, name: &str, value: Captured) {
        self.values.push((name.to_string(), value));
    }
}

/// Match `subject` against `pattern`, returning the bindings on success.
pub fn match_template(pattern: &Template, subject: &Subject) -> Option<Captures> {
    let mut caps = Captures::default();

    match &pattern.origin {
        Origin::None => {}
        Origin::Authority { scheme, host, port } => {
            if !subject.is_absolute() {
                return None;
            }
            match_part(scheme, subject.scheme.as_deref(), true, &mut caps)?;
            match_part(host, subject.host.as_deref(), true, &mut caps)?;
            match port {
                Some(Part::Any) | None => {}
                Some(part) => match_part(part, subject.effective_port(), false, &mut caps)?,
            }
        }
        // Unbound or request-scoped origins never match; rules are bound before use.
        Origin::ServiceUrl(_) | Origin::Frontend(_) => return None,
    }

    if !match_segments(&pattern.path, &subject.segments, &mut caps) {
        return None;
    }

    match_query(&pattern.query, &subject.query, &mut caps)?;

    caps.trailing_slash = subject.trailing_slash;
    caps.fragment = subject.fragment.clone();
    Some(caps)
}

fn match_part(
    part: &Part,
    value: Option<&str>,
    fold_case: bool,
    caps: &mut Captures,
) -> Option<()> {
    match part {
        Part::Any => Some(()),
        Part::Capture(name) => {
            caps.push(name, Captured::Segment(value?.to_string()));
            Some(())
        }
        Part::Literal(lit) => {
            let value = value?;
            let equal = if fold_case {
                lit.eq_ignore_ascii_case(value)
            } else {
                lit == value
            };
            equal.then_some(())
        }
    }
}

fn match_segments(pattern: &[Segment], subject: &[String], caps: &mut Captures) -> bool {
    let Some((first, rest)) = pattern.split_first() else {
        return subject.is_empty();
    };

    match first {
        Segment::Literal(lit) => match subject.split_first() {
            Some((head, tail)) if head == lit => match_segments(rest, tail, caps),
            _ => false,
        },
        Segment::Any => match subject.split_first() {
            Some((_, tail)) => match_segments(rest, tail, caps),
            None => false,
        },
        Segment::Capture(name) => match subject.split_first() {
            Some((head, tail)) => {
                let mark = caps.values.len();
                caps.push(name, Captured::Segment(head.clone()));
                if match_segments(rest, tail, caps) {
                    true
                } else {
                    caps.values.truncate(mark);
                    false
                }
            }
            None => false,
        },
        Segment::AnyDeep => {
            (0..=subject.len()).any(|take| {
                let mark = caps.values.len();
                let ok = match_segments(rest, &subject[take..], caps);
                if !ok {
                    caps.values.truncate(mark);
                }
                ok
            })
        }
        Segment::CaptureDeep(name) => (0..=subject.len()).any(|take| {
            let mark = caps.values.len();
            caps.push(name, Captured::Segments(subject[..take].to_vec()));
            let ok = match_segments(rest, &subject[take..], caps);
            if !ok {
                caps.values.truncate(mark);
            }
            ok
        }),
    }
}

fn match_query(
    pattern: &[QueryItem],
    subject: &[(String, Option<String>)],
    caps: &mut Captures,
) -> Option<()> {
    let mut consumed = vec![false; subject.len()];

    for item in pattern {
        let QueryItem::Assign { key, value } = item else {
            continue;
        };
        let idx = subject
            .iter()
            .enumerate()
            .position(|(i, (k, _))| !consumed[i] && k == key)?;
        consumed[idx] = true;
        let actual = &subject[idx].1;
        match value {
            Value::Literal(lit) => {
                if actual.as_deref() != Some(lit.as_str()) {
                    return None;
                }
            }
            Value::Capture(name) => caps.push(name, Captured::Param(actual.clone())),
            // Rejected in patterns at rule build time.
            Value::Username => return None,
        }
    }

    if pattern.iter().any(|q| matches!(q, QueryItem::Rest)) {
        caps.rest_query = subject
            .iter()
            .zip(&consumed)
            .filter(|(_, used)| !**used)
            .map(|(pair, _)| pair.clone())
            .collect();
    }
    Some(())
}
