use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Marker that defers wildcard validation until after interpolation.
const TEMPLATE_MARKER: &str = "{{";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NrnError {
    #[error("empty resource name")]
    EmptyResource,

    #[error("unknown resource type '{found}'")]
    UnknownType { found: String },

    #[error("resource identifier may not be empty")]
    EmptyIdentifier,

    #[error("resource sub-identifier may not be empty when present")]
    EmptySubIdentifier,

    #[error("resource name has {count} segments, expected 2 or 3")]
    TooManySegments { count: usize },

    #[error("invalid wildcard in '{segment}': {reason}")]
    InvalidWildcard { segment: String, reason: String },
}

impl NrnError {
    fn invalid_wildcard(segment: &str, reason: &str) -> Self {
        Self::InvalidWildcard {
            segment: segment.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Nats,
    Js,
    Kv,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Nats => "nats",
            ResourceType::Js => "js",
            ResourceType::Kv => "kv",
        }
    }
}

impl FromStr for ResourceType {
    type Err = NrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nats" => Ok(ResourceType::Nats),
            "js" => Ok(ResourceType::Js),
            "kv" => Ok(ResourceType::Kv),
            other => Err(NrnError::UnknownType {
                found: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A NATS Resource Name: `type:identifier[:sub_identifier]`.
///
/// The sub-identifier means different things per type: a queue group for
/// `nats`, a consumer name for `js`, a key for `kv`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nrn {
    pub resource_type: ResourceType,
    pub identifier: String,
    pub sub_identifier: Option<String>,
}

/// True when `text` carries unexpanded `{{ ... }}` template markers.
pub fn contains_variables(text: &str) -> bool {
    text.contains(TEMPLATE_MARKER)
}

impl Nrn {
    pub fn parse(text: &str) -> Result<Self, NrnError> {
        if text.is_empty() {
            return Err(NrnError::EmptyResource);
        }

        let segments: Vec<&str> = text.split(':').collect();
        if segments.len() > 3 {
            return Err(NrnError::TooManySegments {
                count: segments.len(),
            });
        }

        let resource_type = ResourceType::from_str(segments[0])?;
        if segments.len() < 2 {
            return Err(NrnError::EmptyIdentifier);
        }

        let identifier = segments[1];
        if identifier.is_empty() {
            return Err(NrnError::EmptyIdentifier);
        }

        let sub_identifier = match segments.get(2) {
            Some(sub) if sub.is_empty() => return Err(NrnError::EmptySubIdentifier),
            Some(sub) => Some(sub.to_string()),
            None => None,
        };

        Ok(Nrn {
            resource_type,
            identifier: identifier.to_string(),
            sub_identifier,
        })
    }

    pub fn parse_and_validate(text: &str) -> Result<Self, NrnError> {
        let nrn = Self::parse(text)?;
        nrn.validate()?;
        Ok(nrn)
    }

    /// Wildcard validation per resource type. Segments still carrying
    /// template markers are skipped; they are re-validated once the
    /// interpolator has expanded them.
    pub fn validate(&self) -> Result<(), NrnError> {
        match self.resource_type {
            ResourceType::Nats => {
                validate_full_wildcard_placement(&self.identifier)?;
                if let Some(queue) = &self.sub_identifier {
                    reject_full_wildcard(queue, "queue groups may not contain '>'")?;
                }
            }
            ResourceType::Js => {
                reject_full_wildcard(&self.identifier, "stream names may not contain '>'")?;
                if let Some(consumer) = &self.sub_identifier {
                    reject_full_wildcard(consumer, "consumer names may not contain '>'")?;
                }
            }
            ResourceType::Kv => {
                reject_full_wildcard(&self.identifier, "bucket names may not contain '>'")?;
                if let Some(key) = &self.sub_identifier {
                    validate_full_wildcard_placement(key)?;
                }
            }
        }
        Ok(())
    }

    pub fn has_wildcard(&self) -> bool {
        let segment_has_wildcard = |s: &str| s.contains('*') || s.contains('>');
        segment_has_wildcard(&self.identifier)
            || self
                .sub_identifier
                .as_deref()
                .is_some_and(segment_has_wildcard)
    }
}

impl FromStr for Nrn {
    type Err = NrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Nrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.identifier)?;
        if let Some(sub) = &self.sub_identifier {
            write!(f, ":{sub}")?;
        }
        Ok(())
    }
}

/// `>` may only appear as a whole dot-token and only as the last token.
fn validate_full_wildcard_placement(segment: &str) -> Result<(), NrnError> {
    if contains_variables(segment) {
        return Ok(());
    }

    let tokens: Vec<&str> = segment.split('.').collect();
    for (position, token) in tokens.iter().enumerate() {
        if !token.contains('>') {
            continue;
        }
        if *token != ">" {
            return Err(NrnError::invalid_wildcard(
                segment,
                "'>' must occupy a whole token",
            ));
        }
        if position != tokens.len() - 1 {
            return Err(NrnError::invalid_wildcard(
                segment,
                "'>' must be the last token",
            ));
        }
    }
    Ok(())
}

fn reject_full_wildcard(segment: &str, reason: &str) -> Result<(), NrnError> {
    if contains_variables(segment) {
        return Ok(());
    }
    if segment.contains('>') {
        return Err(NrnError::invalid_wildcard(segment, reason));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_and_three_segment_names() {
        let nrn = Nrn::parse("nats:orders.created").unwrap();
        assert_eq!(nrn.resource_type, ResourceType::Nats);
        assert_eq!(nrn.identifier, "orders.created");
        assert_eq!(nrn.sub_identifier, None);

        let nrn = Nrn::parse("js:ORDERS:processor").unwrap();
        assert_eq!(nrn.resource_type, ResourceType::Js);
        assert_eq!(nrn.identifier, "ORDERS");
        assert_eq!(nrn.sub_identifier.as_deref(), Some("processor"));
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(Nrn::parse(""), Err(NrnError::EmptyResource));
        assert_eq!(
            Nrn::parse("http:foo"),
            Err(NrnError::UnknownType {
                found: "http".to_string()
            })
        );
        assert_eq!(Nrn::parse("nats"), Err(NrnError::EmptyIdentifier));
        assert_eq!(Nrn::parse("nats:"), Err(NrnError::EmptyIdentifier));
        assert_eq!(Nrn::parse("nats:a:"), Err(NrnError::EmptySubIdentifier));
        assert_eq!(
            Nrn::parse("nats:a:b:c"),
            Err(NrnError::TooManySegments { count: 4 })
        );
    }

    #[test]
    fn nats_subject_wildcards() {
        assert!(Nrn::parse_and_validate("nats:orders.>:my-queue").is_ok());
        assert!(Nrn::parse_and_validate("nats:orders.*.created").is_ok());
        assert!(matches!(
            Nrn::parse_and_validate("nats:orders.>.created"),
            Err(NrnError::InvalidWildcard { .. })
        ));
        assert!(matches!(
            Nrn::parse_and_validate("nats:orders>"),
            Err(NrnError::InvalidWildcard { .. })
        ));
        // queue groups may use '*' but never '>'
        assert!(Nrn::parse_and_validate("nats:orders.>:*").is_ok());
        assert!(matches!(
            Nrn::parse_and_validate("nats:orders.>:q.>"),
            Err(NrnError::InvalidWildcard { .. })
        ));
    }

    #[test]
    fn js_and_kv_identifier_wildcards() {
        assert!(Nrn::parse_and_validate("js:*").is_ok());
        assert!(matches!(
            Nrn::parse_and_validate("js:ORDERS.>"),
            Err(NrnError::InvalidWildcard { .. })
        ));
        assert!(matches!(
            Nrn::parse_and_validate("kv:config.>"),
            Err(NrnError::InvalidWildcard { .. })
        ));
        // kv keys take the full wildcard grammar
        assert!(Nrn::parse_and_validate("kv:config:app.>").is_ok());
        assert!(Nrn::parse_and_validate("kv:config:>").is_ok());
        assert!(matches!(
            Nrn::parse_and_validate("kv:config:app.>.x"),
            Err(NrnError::InvalidWildcard { .. })
        ));
    }

    #[test]
    fn template_segments_defer_wildcard_validation() {
        assert!(Nrn::parse_and_validate("js:{{ user.attr.stream }}.>").is_ok());
        assert!(Nrn::parse_and_validate("nats:user.{{ user.id }}.>").is_ok());
        assert!(contains_variables("nats:user.{{ user.id }}.>"));
        assert!(!contains_variables("nats:user.alice.>"));
    }

    #[test]
    fn round_trips_through_display() {
        for text in [
            "nats:orders.>:my-queue",
            "nats:orders.created",
            "js:ORDERS:processor",
            "kv:config:app.>",
        ] {
            let nrn = Nrn::parse(text).unwrap();
            assert_eq!(Nrn::parse(&nrn.to_string()).unwrap(), nrn);
        }
    }

    #[test]
    fn wildcard_detection() {
        assert!(Nrn::parse("nats:orders.>").unwrap().has_wildcard());
        assert!(Nrn::parse("js:ORDERS:*").unwrap().has_wildcard());
        assert!(!Nrn::parse("kv:config:app.theme").unwrap().has_wildcard());
    }
}
