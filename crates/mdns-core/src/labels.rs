//! Label extraction
//!
//! Turns one container's labels into the hostnames it wants published.
//!
//! ## Recognised labels
//!
//! | Key | Generation | Body |
//! |---|---|---|
//! | `docker-mdns.enable` | - | `true` / `false` |
//! | `docker-mdns.domain` | custom | one hostname |
//! | `traefik.http.routers.<name>.rule` | v2/v3 | `Host(`a`, `b`) && ...` |
//! | `traefik.https.routers.<name>.rule` | v2/v3 | same as above |
//! | `traefik.frontend.rule` | v1 | `Host:a,b;PathPrefix:/x` |
//!
//! ## Grammar
//!
//! Current generation: a matcher is the token `Host` (not preceded by an
//! identifier character) immediately followed by `(`. Inside, one or more
//! hostnames quoted with backticks or double quotes, separated by commas,
//! then `)`. There is no escaping; a quoted hostname cannot contain its
//! quote character. `HostRegexp`, `HostSNI` and `HostHeader` are other
//! matchers and are ignored.
//!
//! Legacy generation: `;` separates matchers. A matcher starting with
//! `Host:` lists hostnames separated by `,`.
//!
//! Every hostname is trimmed, lower-cased and must be a valid DNS name. A
//! malformed label is reported and skipped as a whole; the container's other
//! labels are still used.

use std::collections::HashSet;
use std::fmt;

use tracing::warn;

use crate::traits::ContainerSnapshot;

/// Per-container opt-in/opt-out label
pub const ENABLE_LABEL: &str = "docker-mdns.enable";
/// Label naming one extra hostname directly
pub const DOMAIN_LABEL: &str = "docker-mdns.domain";
/// Traefik v1 rule label
pub const LEGACY_RULE_LABEL: &str = "traefik.frontend.rule";

const ROUTER_PREFIXES: [&str; 2] = ["traefik.http.routers.", "traefik.https.routers."];
const ROUTER_SUFFIX: &str = ".rule";
const HOST_MATCHER: &str = "Host";

/// Where a claim came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provenance {
    /// A router rule label
    RuleDerived,
    /// The `docker-mdns.domain` label
    CustomLabel,
    /// The static hostname list of the configuration
    StaticConfig,
}

/// Which label syntax produced a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleGeneration {
    /// `traefik.frontend.rule` with `Host:` matchers
    V1Legacy,
    /// `traefik.http(s).routers.*.rule` with `Host(...)` matchers
    V2V3Current,
    /// Custom label or static configuration
    Custom,
}

/// One hostname wanted by one owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainClaim {
    /// Normalised hostname
    pub hostname: String,
    /// Owning container, `None` for static configuration
    pub container_id: Option<String>,
    /// Where the claim came from
    pub provenance: Provenance,
    /// Label syntax that produced it
    pub generation: RuleGeneration,
}

impl DomainClaim {
    /// A claim coming from the static hostname list
    pub fn from_static(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            container_id: None,
            provenance: Provenance::StaticConfig,
            generation: RuleGeneration::Custom,
        }
    }

    /// Human-readable owner, for logs
    pub fn owner(&self) -> &str {
        self.container_id.as_deref().unwrap_or("static configuration")
    }
}

/// A label that could not be understood
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelParseError {
    /// Label key
    pub key: String,
    /// What was wrong
    pub message: String,
}

impl LabelParseError {
    fn new(key: &str, message: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LabelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

impl From<LabelParseError> for crate::Error {
    fn from(err: LabelParseError) -> Self {
        crate::Error::label_parse(err.key, err.message)
    }
}

/// Typed result of parsing one relevant label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRule {
    /// A current-generation rule naming exactly one hostname
    SingleHost(String),
    /// A current-generation rule naming several hostnames
    MultiHost(Vec<String>),
    /// A legacy `Host:` rule
    LegacyHost(Vec<String>),
    /// The custom-domain label
    CustomDomain(String),
    /// The label is relevant but malformed
    ParseError(LabelParseError),
}

impl ParsedRule {
    /// Hostnames named by the rule (empty for parse errors)
    pub fn hostnames(&self) -> &[String] {
        match self {
            ParsedRule::SingleHost(host) | ParsedRule::CustomDomain(host) => {
                std::slice::from_ref(host)
            }
            ParsedRule::MultiHost(hosts) | ParsedRule::LegacyHost(hosts) => hosts,
            ParsedRule::ParseError(_) => &[],
        }
    }

    fn provenance(&self) -> Provenance {
        match self {
            ParsedRule::CustomDomain(_) => Provenance::CustomLabel,
            _ => Provenance::RuleDerived,
        }
    }

    fn generation(&self) -> RuleGeneration {
        match self {
            ParsedRule::LegacyHost(_) => RuleGeneration::V1Legacy,
            ParsedRule::CustomDomain(_) => RuleGeneration::Custom,
            _ => RuleGeneration::V2V3Current,
        }
    }
}

/// Everything extracted from one container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Container identifier
    pub container_id: String,
    /// Whether the container takes part in publication
    pub enabled: bool,
    /// De-duplicated claims, custom-domain label first
    pub claims: Vec<DomainClaim>,
    /// Labels that were skipped
    pub errors: Vec<LabelParseError>,
}

/// Whether `key` is a current-generation router rule label
///
/// The router name itself is irrelevant, only the rule body matters.
pub fn is_router_rule_key(key: &str) -> bool {
    ROUTER_PREFIXES.iter().any(|prefix| {
        key.strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(ROUTER_SUFFIX))
            .is_some_and(|router| !router.is_empty())
    })
}

/// Basic DNS name validation (RFC 1035 lengths, letters/digits/hyphens)
pub fn is_valid_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

/// Parse the enable label value
pub fn parse_enable(value: &str) -> Result<bool, LabelParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(LabelParseError::new(
            ENABLE_LABEL,
            format!("expected 'true' or 'false', got '{}'", other),
        )),
    }
}

/// Parse one label
///
/// # Returns
///
/// - `None`: the label is unrelated to hostname publication, or is a rule
///   without any host matcher (`PathPrefix(...)` alone)
/// - `Some(ParsedRule)`: the typed rule, possibly a [`ParsedRule::ParseError`]
pub fn parse_label(key: &str, value: &str) -> Option<ParsedRule> {
    if key == DOMAIN_LABEL {
        return Some(parse_custom_domain(key, value));
    }
    if key == LEGACY_RULE_LABEL {
        return parse_legacy_rule(key, value);
    }
    if is_router_rule_key(key) {
        return parse_current_rule(key, value);
    }
    None
}

fn normalize_hostname(key: &str, raw: &str) -> Result<String, LabelParseError> {
    let hostname = raw.trim().to_ascii_lowercase();
    if hostname.is_empty() {
        return Err(LabelParseError::new(key, "empty hostname"));
    }
    if !is_valid_hostname(&hostname) {
        return Err(LabelParseError::new(
            key,
            format!("invalid hostname '{}'", raw.trim()),
        ));
    }
    Ok(hostname)
}

fn push_unique(hosts: &mut Vec<String>, host: String) {
    if !hosts.contains(&host) {
        hosts.push(host);
    }
}

fn parse_custom_domain(key: &str, value: &str) -> ParsedRule {
    match normalize_hostname(key, value) {
        Ok(host) => ParsedRule::CustomDomain(host),
        Err(err) => ParsedRule::ParseError(err),
    }
}

fn parse_legacy_rule(key: &str, value: &str) -> Option<ParsedRule> {
    let mut hosts = Vec::new();
    let mut saw_matcher = false;

    for segment in value.split(';') {
        let Some(list) = segment.trim().strip_prefix("Host:") else {
            continue;
        };
        saw_matcher = true;

        for raw in list.split(',') {
            match normalize_hostname(key, raw) {
                Ok(host) => push_unique(&mut hosts, host),
                Err(err) => return Some(ParsedRule::ParseError(err)),
            }
        }
    }

    saw_matcher.then_some(ParsedRule::LegacyHost(hosts))
}

fn parse_current_rule(key: &str, value: &str) -> Option<ParsedRule> {
    let mut hosts = Vec::new();
    let mut saw_matcher = false;
    let mut offset = 0;

    while let Some(found) = value[offset..].find(HOST_MATCHER) {
        let start = offset + found;
        let after = start + HOST_MATCHER.len();
        offset = after;

        let preceded_by_ident = value[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        if preceded_by_ident || !value[after..].starts_with('(') {
            continue;
        }

        saw_matcher = true;
        match parse_host_arguments(key, &value[after + 1..]) {
            Ok((matched, consumed)) => {
                for host in matched {
                    push_unique(&mut hosts, host);
                }
                offset = after + 1 + consumed;
            }
            Err(err) => return Some(ParsedRule::ParseError(err)),
        }
    }

    if !saw_matcher {
        return None;
    }

    Some(if hosts.len() == 1 {
        ParsedRule::SingleHost(hosts.remove(0))
    } else {
        ParsedRule::MultiHost(hosts)
    })
}

/// Parse `` `a`, "b" ) `` and return the hostnames plus the bytes consumed
/// (including the closing parenthesis).
fn parse_host_arguments(key: &str, input: &str) -> Result<(Vec<String>, usize), LabelParseError> {
    let mut hosts = Vec::new();
    let mut pos = 0;

    loop {
        pos += leading_whitespace(&input[pos..]);

        let quote = match input[pos..].chars().next() {
            Some(c @ ('`' | '"')) => c,
            Some(')') if hosts.is_empty() => {
                return Err(LabelParseError::new(key, "Host() without hostnames"));
            }
            Some(c) => {
                return Err(LabelParseError::new(
                    key,
                    format!("expected quoted hostname, found '{}'", c),
                ));
            }
            None => return Err(LabelParseError::new(key, "unterminated Host(")),
        };
        pos += quote.len_utf8();

        let Some(len) = input[pos..].find(quote) else {
            return Err(LabelParseError::new(key, "unterminated quoted hostname"));
        };
        hosts.push(normalize_hostname(key, &input[pos..pos + len])?);
        pos += len + quote.len_utf8();

        pos += leading_whitespace(&input[pos..]);
        match input[pos..].chars().next() {
            Some(',') => pos += 1,
            Some(')') => return Ok((hosts, pos + 1)),
            Some(c) => {
                return Err(LabelParseError::new(
                    key,
                    format!("expected ',' or ')', found '{}'", c),
                ));
            }
            None => return Err(LabelParseError::new(key, "unterminated Host(")),
        }
    }
}

fn leading_whitespace(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

/// Extract the claims of one container
///
/// # Parameters
///
/// - `container`: The container snapshot of this tick
/// - `enabled_by_default`: Global default (`false` when `--disable` is set)
pub fn extract_claims(container: &ContainerSnapshot, enabled_by_default: bool) -> Extraction {
    let mut extraction = Extraction {
        container_id: container.id.clone(),
        enabled: enabled_by_default,
        ..Default::default()
    };

    if let Some(value) = container.labels.get(ENABLE_LABEL) {
        match parse_enable(value) {
            Ok(enabled) => extraction.enabled = enabled,
            Err(err) => extraction.errors.push(err),
        }
    }

    if extraction.enabled {
        let custom = container
            .labels
            .get_key_value(DOMAIN_LABEL)
            .into_iter();
        let rules = container
            .labels
            .iter()
            .filter(|(key, _)| key.as_str() != DOMAIN_LABEL);

        let mut seen = HashSet::new();
        for (key, value) in custom.chain(rules) {
            match parse_label(key, value) {
                Some(ParsedRule::ParseError(err)) => extraction.errors.push(err),
                Some(rule) => {
                    for host in rule.hostnames() {
                        if seen.insert(host.clone()) {
                            extraction.claims.push(DomainClaim {
                                hostname: host.clone(),
                                container_id: Some(container.id.clone()),
                                provenance: rule.provenance(),
                                generation: rule.generation(),
                            });
                        }
                    }
                }
                None => {}
            }
        }
    }

    for err in &extraction.errors {
        warn!(
            "Skipping label of container {} ({}): {}",
            container.name, container.id, err
        );
    }

    extraction
}
