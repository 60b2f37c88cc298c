//! Rewrite rules and ordered rule sets.

use std::collections::BTreeSet;

use url::Url;

use crate::rewrite::matcher::{match_template, Captured, Captures, Subject};
use crate::rewrite::template::{FrontendPart, Origin, Part, QueryItem, Segment, Template, Value};
use crate::rewrite::{Direction, RewriteContext, RewriteError, RuleError, Scope};

/// A validated pattern → template rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub name: String,
    pub direction: Direction,
    pub scope: Scope,
    pub pattern: Template,
    pub template: Template,
}

impl RewriteRule {
    /// Parse and validate a rule.
    ///
    /// Every placeholder the template references must be captured by the
    /// pattern and every capture must be used.
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        scope: Scope,
        pattern: &str,
        template: &str,
    ) -> Result<Self, RuleError> {
        let name = name.into();
        let malformed = |source: &str, reason: String| RuleError::Malformed {
            rule: name.clone(),
            template: source.to_string(),
            reason,
        };
        let pattern_t = Template::parse(pattern).map_err(|r| malformed(pattern, r))?;
        let template_t = Template::parse(template).map_err(|r| malformed(template, r))?;

        let rule = Self {
            name,
            direction,
            scope,
            pattern: pattern_t,
            template: template_t,
        };
        rule.check_pattern()?;
        rule.check_template()?;
        rule.check_placeholders()?;
        Ok(rule)
    }

    fn unsupported(&self, reason: impl Into<String>) -> RuleError {
        RuleError::Unsupported {
            rule: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn check_pattern(&self) -> Result<(), RuleError> {
        if let Origin::Frontend(_) = self.pattern.origin {
            return Err(self.unsupported("{$frontend} cannot appear in a pattern"));
        }
        let uses_username = self.pattern.query.iter().any(|q| {
            matches!(
                q,
                QueryItem::Assign {
                    value: Value::Username,
                    ..
                }
            )
        });
        if uses_username {
            return Err(self.unsupported("{$username} cannot appear in a pattern"));
        }
        let mut seen = BTreeSet::new();
        for name in self.pattern.names() {
            if !seen.insert(name.clone()) {
                return Err(self.unsupported(format!("pattern captures '{}' twice", name)));
            }
        }
        Ok(())
    }

    fn check_template(&self) -> Result<(), RuleError> {
        if self
            .template
            .path
            .iter()
            .any(|s| matches!(s, Segment::Any | Segment::AnyDeep))
        {
            return Err(self.unsupported("wildcards cannot appear in a replacement template"));
        }
        if let Origin::Authority { scheme, host, port } = &self.template.origin {
            let wild = [Some(scheme), Some(host), port.as_ref()]
                .into_iter()
                .flatten()
                .any(|p| *p == Part::Any);
            if wild {
                return Err(self.unsupported("wildcards cannot appear in a replacement origin"));
            }
        }
        Ok(())
    }

    fn check_placeholders(&self) -> Result<(), RuleError> {
        let captured: BTreeSet<String> = self.pattern.names().into_iter().collect();
        let referenced: BTreeSet<String> = self.template.names().into_iter().collect();

        if let Some(name) = referenced.difference(&captured).next() {
            return Err(RuleError::Uncaptured {
                rule: self.name.clone(),
                name: name.clone(),
            });
        }
        if let Some(name) = captured.difference(&referenced).next() {
            return Err(RuleError::Unused {
                rule: self.name.clone(),
                name: name.clone(),
            });
        }
        let from_query = self.pattern.query_names();
        if let Some(name) = self
            .template
            .authority_names()
            .into_iter()
            .find(|name| from_query.contains(name))
        {
            return Err(self.unsupported(format!(
                "query capture '{}' may have no value and cannot fill the authority",
                name
            )));
        }
        match (self.pattern.has_rest_query(), self.template.has_rest_query()) {
            (false, true) => Err(RuleError::Uncaptured {
                rule: self.name.clone(),
                name: "?{**}".into(),
            }),
            (true, false) => Err(RuleError::Unused {
                rule: self.name.clone(),
                name: "?{**}".into(),
            }),
            _ => Ok(()),
        }
    }

    /// Roles referenced through `{$serviceUrl[..]}`; `None` is the binding itself.
    pub fn service_refs(&self) -> BTreeSet<Option<String>> {
        let mut refs = self.pattern.service_refs();
        refs.extend(self.template.service_refs());
        refs
    }

    /// Resolve `{$serviceUrl}` functions against concrete backend URLs.
    pub fn bind<F>(&self, resolve: &F) -> Result<RewriteRule, RuleError>
    where
        F: Fn(Option<&str>) -> Option<Url>,
    {
        Ok(Self {
            name: self.name.clone(),
            direction: self.direction,
            scope: self.scope,
            pattern: self.bind_template(&self.pattern, resolve, true)?,
            template: self.bind_template(&self.template, resolve, false)?,
        })
    }

    fn bind_template<F>(
        &self,
        template: &Template,
        resolve: &F,
        is_pattern: bool,
    ) -> Result<Template, RuleError>
    where
        F: Fn(Option<&str>) -> Option<Url>,
    {
        let Origin::ServiceUrl(role) = &template.origin else {
            return Ok(template.clone());
        };
        let url = resolve(role.as_deref()).ok_or_else(|| RuleError::UnboundService {
            rule: self.name.clone(),
            role: role.clone().unwrap_or_else(|| "<self>".into()),
        })?;
        let host = url.host_str().ok_or_else(|| RuleError::UnboundService {
            rule: self.name.clone(),
            role: role.clone().unwrap_or_else(|| "<self>".into()),
        })?;
        // Patterns compare against the effective port; replacements only
        // emit a port the URL spells out.
        let port = if is_pattern {
            url.port_or_known_default()
        } else {
            url.port()
        };

        let mut path: Vec<Segment> = url
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| Segment::Literal(s.to_string()))
            .collect();
        path.extend(template.path.iter().cloned());

        Ok(Template {
            source: template.source.clone(),
            origin: Origin::Authority {
                scheme: Part::Literal(url.scheme().to_string()),
                host: Part::Literal(host.to_string()),
                port: port.map(|p| Part::Literal(p.to_string())),
            },
            path,
            query: template.query.clone(),
        })
    }

    /// Try this rule against a parsed subject.
    pub fn try_rewrite(
        &self,
        subject: &Subject,
        ctx: &RewriteContext,
    ) -> Result<Option<String>, RewriteError> {
        match match_template(&self.pattern, subject) {
            Some(caps) => self.render(&caps, ctx).map(Some),
            None => Ok(None),
        }
    }

    fn render(&self, caps: &Captures, ctx: &RewriteContext) -> Result<String, RewriteError> {
        let mut out = String::new();
        let t = &self.template;

        match &t.origin {
            Origin::None => {}
            Origin::Authority { scheme, host, port } => {
                out.push_str(&self.render_part(scheme, caps)?);
                out.push_str("://");
                out.push_str(&self.render_part(host, caps)?);
                if let Some(port) = port {
                    out.push(':');
                    out.push_str(&self.render_part(port, caps)?);
                }
            }
            Origin::Frontend(FrontendPart::Url) => out.push_str(
                ctx.frontend_url
                    .as_deref()
                    .ok_or_else(|| self.missing_context())?,
            ),
            Origin::Frontend(FrontendPart::Path) => out.push_str(
                ctx.frontend_path
                    .as_deref()
                    .ok_or_else(|| self.missing_context())?,
            ),
            Origin::ServiceUrl(_) => return Err(self.unresolved("$serviceUrl")),
        }

        let mut segments: Vec<&str> = Vec::new();
        for seg in &t.path {
            match seg {
                Segment::Literal(lit) => segments.push(lit),
                Segment::Capture(name) | Segment::CaptureDeep(name) => {
                    match caps.get(name).ok_or_else(|| self.unresolved(name))? {
                        Captured::Segment(s) => segments.push(s),
                        Captured::Segments(list) => {
                            segments.extend(list.iter().map(String::as_str))
                        }
                        Captured::Param(Some(v)) => segments.push(v),
                        Captured::Param(None) => {}
                    }
                }
                Segment::Any | Segment::AnyDeep => return Err(self.unresolved("*")),
            }
        }
        if !segments.is_empty() {
            out.push('/');
            out.push_str(&segments.join("/"));
            if caps.trailing_slash && matches!(t.path.last(), Some(Segment::CaptureDeep(_))) {
                out.push('/');
            }
        } else if out.is_empty() {
            out.push('/');
        }

        let mut params: Vec<String> = Vec::new();
        for item in &t.query {
            match item {
                QueryItem::Assign { key, value } => match value {
                    Value::Literal(v) => params.push(format!("{}={}", key, v)),
                    Value::Capture(name) => {
                        match caps.get(name).ok_or_else(|| self.unresolved(name))?.as_text() {
                            Some(v) => params.push(format!("{}={}", key, v)),
                            None => params.push(key.clone()),
                        }
                    }
                    Value::Username => {
                        if let Some(user) = &ctx.username {
                            params.push(format!("{}={}", key, user));
                        }
                    }
                },
                QueryItem::Rest => params.extend(caps.rest_query.iter().map(|(k, v)| match v {
                    Some(v) => format!("{}={}", k, v),
                    None => k.clone(),
                })),
            }
        }
        if !params.is_empty() {
            out.push('?');
            out.push_str(&params.join("&"));
        }

        if let Some(fragment) = &caps.fragment {
            out.push('#');
            out.push_str(fragment);
        }
        Ok(out)
    }

    fn render_part(&self, part: &Part, caps: &Captures) -> Result<String, RewriteError> {
        match part {
            Part::Literal(lit) => Ok(lit.clone()),
            Part::Capture(name) => caps
                .get(name)
                .and_then(Captured::as_text)
                .ok_or_else(|| self.unresolved(name)),
            Part::Any => Err(self.unresolved("*")),
        }
    }

    fn unresolved(&self, name: &str) -> RewriteError {
        RewriteError::UnresolvedPlaceholder {
            rule: self.name.clone(),
            name: name.to_string(),
        }
    }

    fn missing_context(&self) -> RewriteError {
        RewriteError::MissingContext {
            rule: self.name.clone(),
        }
    }
}

/// An ordered list of rules evaluated first-match-wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<RewriteRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&RewriteRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Bind every rule, failing on the first one that cannot be resolved.
    pub fn bind<F>(&self, resolve: &F) -> Result<RuleSet, RuleError>
    where
        F: Fn(Option<&str>) -> Option<Url>,
    {
        self.rules
            .iter()
            .map(|r| r.bind(resolve))
            .collect::<Result<Vec<_>, _>>()
            .map(RuleSet::new)
    }

    /// Rewrite with the first rule in declaration order that matches.
    ///
    /// Returns `Ok(None)` when no rule applies.
    pub fn apply(
        &self,
        direction: Direction,
        scope: Scope,
        subject: &str,
        ctx: &RewriteContext,
    ) -> Result<Option<String>, RewriteError> {
        let parsed = Subject::parse(subject);
        for rule in &self.rules {
            if rule.direction != direction || !rule.scope.admits(scope) {
                continue;
            }
            if let Some(out) = rule.try_rewrite(&parsed, ctx)? {
                tracing::trace!(rule = %rule.name, from = %subject, to = %out, "Rewrote subject");
                return Ok(Some(out));
            }
        }
        Ok(None)
    }

    /// Rewrite with one named rule only.
    pub fn apply_named(
        &self,
        name: &str,
        subject: &str,
        ctx: &RewriteContext,
    ) -> Result<Option<String>, RewriteError> {
        let rule = self
            .find(name)
            .ok_or_else(|| RewriteError::UnknownRule(name.to_string()))?;
        rule.try_rewrite(&Subject::parse(subject), ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKEND: &str = "http://localhost:8080";

    fn inbound(name: &str, pattern: &str, template: &str) -> RewriteRule {
        RewriteRule::new(name, Direction::Inbound, Scope::Any, pattern, template).unwrap()
    }

    fn outbound(name: &str, pattern: &str, template: &str) -> RewriteRule {
        RewriteRule::new(name, Direction::Outbound, Scope::Any, pattern, template).unwrap()
    }

    fn resolver(role: Option<&str>) -> Option<Url> {
        match role {
            None | Some("AMBARI") => Url::parse(BACKEND).ok(),
            Some("NAMENODE") => Url::parse("hdfs://nn:8020").ok(),
            _ => None,
        }
    }

    fn ctx() -> RewriteContext {
        RewriteContext::new("https://gw:8443/gateway/sandbox")
    }

    #[test]
    fn placeholder_balance_is_checked_at_build_time() {
        let err = RewriteRule::new("r", Direction::Inbound, Scope::Any, "/a/{x}", "/b/{y}")
            .unwrap_err();
        assert_eq!(err, RuleError::Uncaptured { rule: "r".into(), name: "y".into() });

        let err = RewriteRule::new("r", Direction::Inbound, Scope::Any, "/a/{x}/{y}", "/b/{x}")
            .unwrap_err();
        assert_eq!(err, RuleError::Unused { rule: "r".into(), name: "y".into() });

        let err = RewriteRule::new("r", Direction::Inbound, Scope::Any, "/a?{**}", "/b")
            .unwrap_err();
        assert!(matches!(err, RuleError::Unused { .. }));

        let err = RewriteRule::new("r", Direction::Inbound, Scope::Any, "/a/{x}/{x}", "/b/{x}")
            .unwrap_err();
        assert!(matches!(err, RuleError::Unsupported { .. }));

        let err = RewriteRule::new("r", Direction::Inbound, Scope::Any, "/a/{x}", "/b/*/{x}")
            .unwrap_err();
        assert!(matches!(err, RuleError::Unsupported { .. }));
    }

    #[test]
    fn query_capture_cannot_fill_the_authority() {
        let err = RewriteRule::new(
            "r",
            Direction::Inbound,
            Scope::Any,
            "/redirect?{host}",
            "http://{host}:8080/landing",
        )
        .unwrap_err();
        assert!(
            matches!(err, RuleError::Unsupported { ref reason, .. } if reason.contains("host"))
        );

        // Path and query positions tolerate a valueless parameter.
        let rule =
            RewriteRule::new("r", Direction::Inbound, Scope::Any, "/a?{op}", "/b/{op}?op={op}")
                .unwrap();
        let out = rule.try_rewrite(&Subject::parse("/a?op"), &ctx()).unwrap();
        assert_eq!(out.as_deref(), Some("/b?op"));
    }

    #[test]
    fn binds_service_url_with_base_path() {
        let rule = inbound("r", "/api/{**}", "{$serviceUrl}/api/{**}")
            .bind(&|_: Option<&str>| Url::parse("http://backend:9000/ctx").ok())
            .unwrap();
        let out = rule
            .try_rewrite(&Subject::parse("/api/v1/x"), &ctx())
            .unwrap();
        assert_eq!(out.as_deref(), Some("http://backend:9000/ctx/api/v1/x"));
    }

    #[test]
    fn unbound_role_is_reported() {
        let err = inbound("r", "/api/{**}", "{$serviceUrl[HIVE]}/api/{**}")
            .bind(&resolver)
            .unwrap_err();
        assert_eq!(err, RuleError::UnboundService { rule: "r".into(), role: "HIVE".into() });
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        let set = RuleSet::new(vec![
            outbound("a", "*://*:*/api/{**}", "{$frontend[url]}/first/{**}"),
            outbound("b", "*://*:*/api/v1/{**}", "{$frontend[url]}/second/{**}"),
        ]);
        let out = set
            .apply(Direction::Outbound, Scope::Body, "http://h:1/api/v1/clusters", &ctx())
            .unwrap();
        assert_eq!(out.as_deref(), Some("https://gw:8443/gateway/sandbox/first/v1/clusters"));
    }

    #[test]
    fn direction_and_scope_filter_candidates() {
        let set = RuleSet::new(vec![
            RewriteRule::new(
                "hdr",
                Direction::Outbound,
                Scope::Header,
                "*://*:*/{**}",
                "{$frontend[path]}/h/{**}",
            )
            .unwrap(),
            outbound("any", "*://*:*/{**}", "{$frontend[path]}/a/{**}"),
        ]);
        let body = set
            .apply(Direction::Outbound, Scope::Body, "http://h:1/x", &ctx())
            .unwrap();
        assert_eq!(body.as_deref(), Some("/gateway/sandbox/a/x"));
        let header = set
            .apply(Direction::Outbound, Scope::Header, "http://h:1/x", &ctx())
            .unwrap();
        assert_eq!(header.as_deref(), Some("/gateway/sandbox/h/x"));
        assert_eq!(
            set.apply(Direction::Inbound, Scope::Body, "http://h:1/x", &ctx()).unwrap(),
            None
        );
    }

    #[test]
    fn unmatched_subject_passes_through() {
        let set = RuleSet::new(vec![outbound("a", "*://*:*/api/{**}", "{$frontend[url]}/x/{**}")]);
        let out = crate::rewrite::rewrite(
            Direction::Outbound,
            &set,
            Scope::Body,
            "mailto:someone",
            &ctx(),
        )
        .unwrap();
        assert_eq!(out, "mailto:someone");
    }

    #[test]
    fn outbound_then_inbound_round_trips() {
        let out_rule = outbound(
            "out",
            "*://*:*/api/{path=**}?{**}",
            "{$frontend[url]}/ambari/api/{path=**}?{**}",
        );
        let in_rule = inbound(
            "in",
            "*://*:*/**/ambari/api/{path=**}?{**}",
            "{$serviceUrl}/api/{path=**}?{**}",
        )
        .bind(&resolver)
        .unwrap();

        for original in [
            "http://localhost:8080/api/v1/clusters",
            "http://localhost:8080/api/v1/clusters/test/hosts?fields=Hosts/host_name&minimal",
            "http://localhost:8080/api/v1/services/",
        ] {
            let client_facing = out_rule
                .try_rewrite(&Subject::parse(original), &ctx())
                .unwrap()
                .unwrap();
            assert!(client_facing.starts_with("https://gw:8443/gateway/sandbox/ambari/api/"));
            let back = in_rule
                .try_rewrite(&Subject::parse(&client_facing), &ctx())
                .unwrap()
                .unwrap();
            assert_eq!(back, original);
        }
    }

    #[test]
    fn query_functions_render() {
        let rule = inbound(
            "hdfs",
            "*://*:*/**/webhdfs/{version}/{path=**}?{**}",
            "{$serviceUrl[NAMENODE]}/webhdfs/{version}/{path=**}?user.name={$username}&{**}",
        )
        .bind(&resolver)
        .unwrap();
        let ctx = ctx().with_username(Some("guest".into()));
        let out = rule
            .try_rewrite(
                &Subject::parse("https://gw:8443/gateway/sandbox/webhdfs/v1/tmp/f?op=OPEN"),
                &ctx,
            )
            .unwrap();
        assert_eq!(out.as_deref(), Some("hdfs://nn:8020/webhdfs/v1/tmp/f?user.name=guest&op=OPEN"));
    }

    #[test]
    fn named_rule_application() {
        let set = RuleSet::new(vec![outbound("links", "*://*:*/{**}", "{$frontend[path]}/{**}")]);
        assert!(set.apply_named("missing", "/x", &ctx()).is_err());
        assert_eq!(
            set.apply_named("links", "http://h:1/x", &ctx()).unwrap().as_deref(),
            Some("/gateway/sandbox/x")
        );
    }
}
