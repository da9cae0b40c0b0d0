//! Derivation and resolution of subjects
//!
//! Every action and event lives on a subject of the shape `{namespace}.{kind}.{version}.{resource}`
//! where `kind` is either `action` or `event`. Callers usually don't spell out the full subject
//! but use one of two shorthands which are expanded by the [`SubjectRouter`]:
//!
//! - `resource.verb` uses the namespace and version of the local broker
//! - `version.resource.verb` uses the namespace of the local broker but a caller-supplied version
//!
//! The namespace is never overridable by the caller.

use crate::error::BrokerError;
use std::fmt::{self, Display, Formatter};

const SUBJECT_SEPARATOR: char = '.';

/// Kind of verb a subject addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    /// Request/reply method
    Action,
    /// Fire-and-forget notification
    Event,
}

impl SubjectKind {
    /// Segment inserted after the namespace
    pub fn segment(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Event => "event",
        }
    }
}

/// Canonical, well-formed subject as it is used on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(String);

impl Subject {
    /// Borrows the subject as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Subject {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Result of expanding a shorthand subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSubject {
    /// Canonical subject to send the message to
    pub subject: Subject,
    /// Action or event name within the resource
    pub verb: String,
}

/// Derives subjects from the identity of a broker
#[derive(Debug, Clone)]
pub struct SubjectRouter {
    namespace: String,
    version: String,
    host: String,
}

impl SubjectRouter {
    /// Creates a new router from the broker identity
    pub fn new(
        namespace: impl Into<String>,
        version: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
            host: host.into(),
        }
    }

    /// Namespace all subjects are placed in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Version segment used when none is supplied by the caller
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Identity of the local host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Subject on which actions of the given resource are served
    pub fn action_subject(&self, resource: &str) -> Subject {
        self.subject(SubjectKind::Action, &self.version, resource)
    }

    /// Subject on which events of the given resource are delivered
    pub fn event_subject(&self, resource: &str) -> Subject {
        self.subject(SubjectKind::Event, &self.version, resource)
    }

    /// Builds a subject with an explicit version
    pub fn subject(&self, kind: SubjectKind, version: &str, resource: &str) -> Subject {
        Subject(format!(
            "{}.{}.{}.{}",
            self.namespace,
            kind.segment(),
            version,
            resource
        ))
    }

    /// Expands a `resource.action` or `version.resource.action` shorthand
    pub fn resolve_call_subject(&self, input: &str) -> Result<ResolvedSubject, BrokerError> {
        self.resolve(SubjectKind::Action, input)
    }

    /// Expands a `resource.event` or `version.resource.event` shorthand
    pub fn resolve_event_subject(&self, input: &str) -> Result<ResolvedSubject, BrokerError> {
        self.resolve(SubjectKind::Event, input)
    }

    /// Expands a shorthand subject of either kind
    ///
    /// Fails with [`BrokerError::InvalidSubject`] if the input does not have exactly two or three
    /// segments or if any of the segments is empty.
    pub fn resolve(&self, kind: SubjectKind, input: &str) -> Result<ResolvedSubject, BrokerError> {
        let segments: Vec<&str> = input.split(SUBJECT_SEPARATOR).collect();

        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(self.invalid(input));
        }

        let (version, resource, verb) = match segments.as_slice() {
            [resource, verb] => (self.version.as_str(), *resource, *verb),
            [version, resource, verb] => (*version, *resource, *verb),
            _ => return Err(self.invalid(input)),
        };

        Ok(ResolvedSubject {
            subject: self.subject(kind, version, resource),
            verb: verb.to_string(),
        })
    }

    /// Ensures a resource can be reached through a shorthand subject.
    /// Rejects empty names and names containing the segment separator.
    pub fn validate_resource(&self, resource: &str) -> Result<(), BrokerError> {
        if resource.is_empty() || resource.contains(SUBJECT_SEPARATOR) {
            return Err(self.invalid(resource));
        }

        Ok(())
    }

    fn invalid(&self, input: &str) -> BrokerError {
        BrokerError::InvalidSubject {
            host: self.host.clone(),
            input: input.to_string(),
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    fn router() -> SubjectRouter {
        SubjectRouter::new("default", "v1", "test-host")
    }

    #[test]
    fn derive_canonical_subjects() {
        let router = router();

        assert_eq!(
            router.action_subject("resource").as_str(),
            "default.action.v1.resource"
        );
        assert_eq!(
            router.event_subject("resource").as_str(),
            "default.event.v1.resource"
        );
    }

    #[test]
    fn resolve_two_segments_with_local_version() {
        let resolved = router().resolve_call_subject("resource.read").unwrap();

        assert_eq!(resolved.subject.as_str(), "default.action.v1.resource");
        assert_eq!(resolved.verb, "read");
    }

    #[test]
    fn resolve_three_segments_with_foreign_version() {
        let resolved = router().resolve_call_subject("v2.resource.read").unwrap();

        assert_eq!(resolved.subject.as_str(), "default.action.v2.resource");
        assert_eq!(resolved.verb, "read");
    }

    #[test]
    fn resolve_event_subjects() {
        let resolved = router().resolve_event_subject("resource.updated").unwrap();

        assert_eq!(resolved.subject.as_str(), "default.event.v1.resource");
        assert_eq!(resolved.verb, "updated");
    }

    #[test]
    fn reject_invalid_segment_counts() {
        let router = router();

        for input in &["", "resource", "a.b.c.d", "ns.v1.resource.read.extra"] {
            match router.resolve_call_subject(input) {
                Err(BrokerError::InvalidSubject { host, input: rejected }) => {
                    assert_eq!(host, "test-host");
                    assert_eq!(rejected, *input);
                }
                other => panic!("expected invalid subject for {:?}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn reject_empty_segments() {
        let router = router();

        assert!(router.resolve_call_subject("resource.").is_err());
        assert!(router.resolve_event_subject(".updated").is_err());
        assert!(router.resolve_call_subject("v1..read").is_err());
    }

    #[test]
    fn validate_resource_names() {
        let router = router();

        assert!(router.validate_resource("resource").is_ok());
        assert!(router.validate_resource("user-profiles").is_ok());
        assert!(matches!(
            router.validate_resource(""),
            Err(BrokerError::InvalidSubject { .. })
        ));
        assert!(matches!(
            router.validate_resource("users.admin"),
            Err(BrokerError::InvalidSubject { .. })
        ));
    }

    #[test]
    fn resolve_deterministically() {
        let router = router();

        assert_eq!(
            router.resolve_call_subject("v3.users.list").unwrap(),
            router.resolve_call_subject("v3.users.list").unwrap()
        );
    }
}
