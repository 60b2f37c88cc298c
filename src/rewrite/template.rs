//! URL-shaped template grammar shared by rule patterns and replacements.
//!
//! ```text
//! template  := [origin] path ['?' query]
//! origin    := scheme '://' host [':' port]
//!            | '{$serviceUrl}' | '{$serviceUrl[ROLE]}'
//!            | '{$frontend[url]}' | '{$frontend[path]}'
//! path      := ('/' segment)*
//! segment   := literal | '*' | '**' | '{name}' | '{name=**}' | '{**}'
//! query     := item ('&' item)*
//! item      := '{name}' | '{**}' | key '=' (literal | '{name}' | '{$username}')
//! ```
//!
//! Parsing is purely syntactic. Which constructs are legal in a pattern as
//! opposed to a replacement is checked by `rule.rs`.

use std::collections::BTreeSet;

/// One part of a `scheme://host:port` origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Literal(String),
    Any,
    Capture(String),
}

/// Which piece of the client-facing address `{$frontend[..]}` expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendPart {
    Url,
    Path,
}

/// Leading origin of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Path-only template.
    None,
    Authority {
        scheme: Part,
        host: Part,
        port: Option<Part>,
    },
    /// `{$serviceUrl}` (this binding) or `{$serviceUrl[ROLE]}`; replaced at deployment.
    ServiceUrl(Option<String>),
    /// Resolved per request from the client-facing address.
    Frontend(FrontendPart),
}

/// One path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// `*`
    Any,
    /// `**`
    AnyDeep,
    /// `{name}`
    Capture(String),
    /// `{name=**}` or `{**}`
    CaptureDeep(String),
}

/// Value side of a query item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Literal(String),
    Capture(String),
    Username,
}

/// One query item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryItem {
    Assign { key: String, value: Value },
    /// `{**}`: every parameter not matched by another item.
    Rest,
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub source: String,
    pub origin: Origin,
    pub path: Vec<Segment>,
    pub query: Vec<QueryItem>,
}

const DEEP: &str = "**";

impl Template {
    /// Parse a template string.
    pub fn parse(source: &str) -> Result<Self, String> {
        let source = source.trim();
        if source.is_empty() {
            return Err("empty template".into());
        }

        let (origin, rest) = parse_origin(source)?;
        let (path_part, query_part) = match rest.find('?') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        if !path_part.is_empty() && !path_part.starts_with('/') {
            return Err(format!("path must start with '/': '{}'", path_part));
        }

        let path = path_part
            .split('/')
            .filter(|s| !s.is_empty())
            .map(parse_segment)
            .collect::<Result<Vec<_>, _>>()?;

        let query = match query_part {
            Some(q) => q
                .split('&')
                .filter(|s| !s.is_empty())
                .map(parse_query_item)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            source: source.to_string(),
            origin,
            path,
            query,
        })
    }

    /// Names this template captures (pattern view) or references (replacement view).
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Origin::Authority { scheme, host, port } = &self.origin {
            for part in [Some(scheme), Some(host), port.as_ref()].into_iter().flatten() {
                if let Part::Capture(name) = part {
                    names.push(name.clone());
                }
            }
        }
        for seg in &self.path {
            match seg {
                Segment::Capture(name) | Segment::CaptureDeep(name) => names.push(name.clone()),
                _ => {}
            }
        }
        for item in &self.query {
            if let QueryItem::Assign {
                value: Value::Capture(name),
                ..
            } = item
            {
                names.push(name.clone());
            }
        }
        names
    }

    /// Names referenced in the scheme, host or port.
    pub fn authority_names(&self) -> Vec<String> {
        match &self.origin {
            Origin::Authority { scheme, host, port } => [Some(scheme), Some(host), port.as_ref()]
                .into_iter()
                .flatten()
                .filter_map(|part| match part {
                    Part::Capture(name) => Some(name.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Names captured from query parameters, whose value may be absent.
    pub fn query_names(&self) -> Vec<String> {
        self.query
            .iter()
            .filter_map(|item| match item {
                QueryItem::Assign {
                    value: Value::Capture(name),
                    ..
                } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// True when the template has a `{**}` query item.
    pub fn has_rest_query(&self) -> bool {
        self.query.iter().any(|q| matches!(q, QueryItem::Rest))
    }

    /// Roles named by `{$serviceUrl[ROLE]}`; `None` stands for the binding itself.
    pub fn service_refs(&self) -> BTreeSet<Option<String>> {
        let mut refs = BTreeSet::new();
        if let Origin::ServiceUrl(role) = &self.origin {
            refs.insert(role.clone());
        }
        refs
    }
}

fn parse_origin(source: &str) -> Result<(Origin, &str), String> {
    if let Some(body) = source.strip_prefix("{$") {
        let end = body
            .find('}')
            .ok_or_else(|| format!("unterminated function in '{}'", source))?;
        let func = &body[..end];
        let rest = &body[end + 1..];
        let origin = match split_function(func)? {
            ("serviceUrl", arg) => Origin::ServiceUrl(arg.map(str::to_string)),
            ("frontend", Some("url")) | ("frontend", None) => Origin::Frontend(FrontendPart::Url),
            ("frontend", Some("path")) => Origin::Frontend(FrontendPart::Path),
            (name, _) => return Err(format!("unknown function '${}' at template start", name)),
        };
        return Ok((origin, rest));
    }

    let Some(scheme_end) = source.find("://") else {
        return Ok((Origin::None, source));
    };
    // "://" inside the path or query is not an origin.
    if source[..scheme_end].contains(['/', '?']) {
        return Ok((Origin::None, source));
    }

    let scheme = parse_part(&source[..scheme_end])?;
    let after = &source[scheme_end + 3..];
    let auth_end = after.find(['/', '?']).unwrap_or(after.len());
    let authority = &after[..auth_end];
    if authority.is_empty() {
        return Err("empty authority".into());
    }

    let (host, port) = split_host_port(authority)?;
    Ok((
        Origin::Authority {
            scheme,
            host: parse_part(host)?,
            port: port.map(parse_part).transpose()?,
        },
        &after[auth_end..],
    ))
}

fn split_host_port(authority: &str) -> Result<(&str, Option<&str>), String> {
    if authority.starts_with('[') {
        let close = authority
            .find(']')
            .ok_or_else(|| format!("unterminated IPv6 host in '{}'", authority))?;
        let host = &authority[..=close];
        let rest = &authority[close + 1..];
        return match rest.strip_prefix(':') {
            Some(port) => Ok((host, Some(port))),
            None if rest.is_empty() => Ok((host, None)),
            None => Err(format!("garbage after host in '{}'", authority)),
        };
    }
    // Braces may hold a capture name but never a ':'.
    match authority.rfind(':') {
        Some(idx) => Ok((&authority[..idx], Some(&authority[idx + 1..]))),
        None => Ok((authority, None)),
    }
}

fn split_function(func: &str) -> Result<(&str, Option<&str>), String> {
    match func.find('[') {
        Some(open) => {
            let inner = func[open + 1..]
                .strip_suffix(']')
                .ok_or_else(|| format!("unterminated argument in '${}'", func))?;
            if inner.is_empty() {
                return Err(format!("empty argument in '${}'", func));
            }
            Ok((&func[..open], Some(inner)))
        }
        None => Ok((func, None)),
    }
}

fn braced(token: &str) -> Option<&str> {
    token.strip_prefix('{').and_then(|t| t.strip_suffix('}'))
}

fn check_name(name: &str) -> Result<(), String> {
    if name == DEEP {
        return Ok(());
    }
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(format!("invalid placeholder name '{}'", name))
    }
}

fn parse_part(token: &str) -> Result<Part, String> {
    if token == "*" {
        return Ok(Part::Any);
    }
    match braced(token) {
        Some(name) => {
            check_name(name)?;
            Ok(Part::Capture(name.to_string()))
        }
        None if token.contains(['{', '}']) => Err(format!("stray brace in '{}'", token)),
        None => Ok(Part::Literal(token.to_string())),
    }
}

fn parse_segment(token: &str) -> Result<Segment, String> {
    match token {
        "*" => return Ok(Segment::Any),
        "**" => return Ok(Segment::AnyDeep),
        _ => {}
    }
    match braced(token) {
        Some(DEEP) => Ok(Segment::CaptureDeep(DEEP.to_string())),
        Some(inner) => match inner.split_once('=') {
            Some((name, DEEP)) => {
                check_name(name)?;
                Ok(Segment::CaptureDeep(name.to_string()))
            }
            Some((name, "*")) => {
                check_name(name)?;
                Ok(Segment::Capture(name.to_string()))
            }
            Some(_) => Err(format!("unsupported capture form '{}'", token)),
            None if inner.starts_with('$') => {
                Err(format!("function '{}' is only allowed at template start", token))
            }
            None => {
                check_name(inner)?;
                Ok(Segment::Capture(inner.to_string()))
            }
        },
        None if token.contains(['{', '}']) => Err(format!("stray brace in '{}'", token)),
        None => Ok(Segment::Literal(token.to_string())),
    }
}

fn parse_query_item(token: &str) -> Result<QueryItem, String> {
    if let Some(inner) = braced(token) {
        if inner == DEEP {
            return Ok(QueryItem::Rest);
        }
        check_name(inner)?;
        return Ok(QueryItem::Assign {
            key: inner.to_string(),
            value: Value::Capture(inner.to_string()),
        });
    }

    let (key, value) = token
        .split_once('=')
        .ok_or_else(|| format!("query item '{}' needs a value", token))?;
    if key.is_empty() || key.contains(['{', '}']) {
        return Err(format!("invalid query key in '{}'", token));
    }
    let value = match braced(value) {
        Some("$username") => Value::Username,
        Some(name) if name.starts_with('$') => {
            return Err(format!("unknown function '{}' in query", name))
        }
        Some(name) => {
            check_name(name)?;
            Value::Capture(name.to_string())
        }
        None if value.contains(['{', '}']) => return Err(format!("stray brace in '{}'", token)),
        None => Value::Literal(value.to_string()),
    };
    Ok(QueryItem::Assign {
        key: key.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wildcard_authority_pattern() {
        let t = Template::parse("*://*:*/**/ambari/api/{path=**}?{**}").unwrap();
        assert_eq!(
            t.origin,
            Origin::Authority {
                scheme: Part::Any,
                host: Part::Any,
                port: Some(Part::Any),
            }
        );
        assert_eq!(
            t.path,
            vec![
                Segment::AnyDeep,
                Segment::Literal("ambari".into()),
                Segment::Literal("api".into()),
                Segment::CaptureDeep("path".into()),
            ]
        );
        assert_eq!(t.query, vec![QueryItem::Rest]);
        assert_eq!(t.names(), vec!["path".to_string()]);
    }

    #[test]
    fn parses_function_origins() {
        let t = Template::parse("{$serviceUrl[WEBHDFS]}/webhdfs/v1/{path=**}").unwrap();
        assert_eq!(t.origin, Origin::ServiceUrl(Some("WEBHDFS".into())));

        let t = Template::parse("{$frontend[path]}/ambari/{**}").unwrap();
        assert_eq!(t.origin, Origin::Frontend(FrontendPart::Path));
        assert_eq!(
            t.path,
            vec![Segment::Literal("ambari".into()), Segment::CaptureDeep("**".into())]
        );
    }

    #[test]
    fn parses_query_forms() {
        let t = Template::parse("/x?{op}&user.name={$username}&format=json&{**}").unwrap();
        assert_eq!(
            t.query,
            vec![
                QueryItem::Assign { key: "op".into(), value: Value::Capture("op".into()) },
                QueryItem::Assign { key: "user.name".into(), value: Value::Username },
                QueryItem::Assign { key: "format".into(), value: Value::Literal("json".into()) },
                QueryItem::Rest,
            ]
        );
    }

    #[test]
    fn parses_ipv6_literal_host() {
        let t = Template::parse("http://[::1]:8080/api").unwrap();
        assert_eq!(
            t.origin,
            Origin::Authority {
                scheme: Part::Literal("http".into()),
                host: Part::Literal("[::1]".into()),
                port: Some(Part::Literal("8080".into())),
            }
        );
    }

    #[test]
    fn rejects_malformed() {
        assert!(Template::parse("").is_err());
        assert!(Template::parse("/a/{b").is_err());
        assert!(Template::parse("/a/{$frontend}").is_err());
        assert!(Template::parse("{$nope}/a").is_err());
        assert!(Template::parse("/a?flag").is_err());
        assert!(Template::parse("api/v1").is_err());
    }
}
