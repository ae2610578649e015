//! Canonical Policy Types
//!
//! Provider-neutral IDQL statements: who (subject members) may do what
//! (action URIs) on which resource.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize, Serializer};

/// IDQL version stamped on statements produced by this crate
pub const IDQL_VERSION: &str = "0.5";

/// Scheme used for HTTP-verb action URIs (e.g. `http:GET`)
pub const HTTP_SCHEME: &str = "http";

/// A single canonical policy statement.
///
/// Actions and members compare as sets and always serialize sorted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInfo {
    /// IDQL version
    #[serde(default = "default_version")]
    pub version: String,
    /// Action URIs, e.g. `http:GET` or `gcp:roles/iap.httpsResourceAccessor`
    #[serde(default, serialize_with = "serialize_sorted")]
    pub actions: Vec<String>,
    /// Principal identifiers, e.g. `user:alice@example.com`
    #[serde(default, serialize_with = "serialize_sorted")]
    pub subject_members: Vec<String>,
    /// Provider resource identifier the statement applies to
    #[serde(default)]
    pub resource_id: String,
}

fn default_version() -> String {
    IDQL_VERSION.to_string()
}

fn sorted_set(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

fn serialize_sorted<S: Serializer>(values: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(sorted_set(values))
}

impl PartialEq for PolicyInfo {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.resource_id == other.resource_id
            && sorted_set(&self.actions) == sorted_set(&other.actions)
            && sorted_set(&self.subject_members) == sorted_set(&other.subject_members)
    }
}

impl Eq for PolicyInfo {}

impl PolicyInfo {
    pub fn new(
        actions: Vec<String>,
        subject_members: Vec<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            version: default_version(),
            actions,
            subject_members,
            resource_id: resource_id.into(),
        }
    }

    /// Copy of this statement carrying a different resource id
    pub fn with_resource(&self, resource_id: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            ..self.clone()
        }
    }

    /// Copy of this statement with its action list replaced
    pub fn with_actions(&self, actions: Vec<String>) -> Self {
        Self {
            actions,
            ..self.clone()
        }
    }
}

/// Principal type of a subject member, taken from its `kind:` prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberKind {
    User,
    Group,
    Domain,
    ServiceAccount,
    Other(String),
}

impl MemberKind {
    /// Parse the kind of a member such as `user:alice@example.com`.
    ///
    /// Members without a prefix are reported as `Other("")`.
    pub fn of(member: &str) -> Self {
        let kind = member
            .split_once(':')
            .map(|(kind, _)| kind.trim())
            .unwrap_or("");

        match kind.to_ascii_lowercase().as_str() {
            "user" => MemberKind::User,
            "group" => MemberKind::Group,
            "domain" => MemberKind::Domain,
            "serviceaccount" => MemberKind::ServiceAccount,
            _ => MemberKind::Other(kind.to_string()),
        }
    }
}

impl std::fmt::Display for MemberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberKind::User => write!(f, "user"),
            MemberKind::Group => write!(f, "group"),
            MemberKind::Domain => write!(f, "domain"),
            MemberKind::ServiceAccount => write!(f, "serviceAccount"),
            MemberKind::Other(kind) => write!(f, "{}", kind),
        }
    }
}

/// Value part of a member (`alice@example.com` for `user:alice@example.com`)
pub fn member_value(member: &str) -> &str {
    member
        .split_once(':')
        .map(|(_, value)| value.trim())
        .unwrap_or_else(|| member.trim())
}

/// Split an action URI into `(scheme, value)`.
///
/// Only the first `:` separates, so `gcp:roles/x:y` yields `("gcp", "roles/x:y")`.
pub fn split_action_uri(uri: &str) -> Option<(&str, &str)> {
    let (scheme, value) = uri.trim().split_once(':')?;
    if scheme.is_empty() || value.is_empty() {
        return None;
    }
    Some((scheme, value))
}

pub fn action_uri(scheme: &str, value: &str) -> String {
    format!("{}:{}", scheme, value)
}

/// HTTP-method-like verbs a resource-action-role record may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Connect,
    Trace,
}

impl HttpVerb {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(HttpVerb::Get),
            "POST" => Some(HttpVerb::Post),
            "PUT" => Some(HttpVerb::Put),
            "PATCH" => Some(HttpVerb::Patch),
            "DELETE" => Some(HttpVerb::Delete),
            "HEAD" => Some(HttpVerb::Head),
            "OPTIONS" => Some(HttpVerb::Options),
            "CONNECT" => Some(HttpVerb::Connect),
            "TRACE" => Some(HttpVerb::Trace),
            _ => None,
        }
    }

    /// Resolve an action that is either a bare verb (`GET`) or an
    /// `http:` action URI (`http:GET`).
    pub fn from_action(action: &str) -> Option<Self> {
        match split_action_uri(action) {
            Some((scheme, value)) if scheme.eq_ignore_ascii_case(HTTP_SCHEME) => Self::parse(value),
            Some(_) => None,
            None => Self::parse(action),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
            HttpVerb::Patch => "PATCH",
            HttpVerb::Delete => "DELETE",
            HttpVerb::Head => "HEAD",
            HttpVerb::Options => "OPTIONS",
            HttpVerb::Connect => "CONNECT",
            HttpVerb::Trace => "TRACE",
        }
    }

    pub fn action_uri(&self) -> String {
        action_uri(HTTP_SCHEME, self.as_str())
    }
}

impl std::fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
