use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// A concrete routing topic: a dot-separated sequence of non-empty segments,
/// e.g. `agent.task.researcher`. Topics never contain wildcards; those belong
/// to [`TopicPattern`]s.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    raw: Arc<str>,
}

/// A subscription binding pattern: a dot-separated sequence of segments where
/// `*` stands for exactly one segment and `#` stands for zero or more
/// segments.
///
/// The wildcard characters are only recognized as whole segments; `foo*` is
/// rejected. Matching against a [`Topic`] is defined recursively and is total:
/// every `(pattern, topic)` pair yields `true` or `false`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    raw: Arc<str>,
    segments: Vec<PatternSegment>,
}

/// Represents failure to parse a [`Topic`] or a [`TopicPattern`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// The input was empty, or contained an empty dot-separated segment.
    #[error("topic '{0}' contains an empty segment")]
    EmptySegment(String),
    /// A wildcard character appeared where it is not allowed.
    #[error("topic '{0}' may not contain the wildcard segment '{1}'")]
    UnexpectedWildcard(String, char),
    /// A wildcard character appeared inside a longer segment.
    #[error("pattern '{0}' embeds a wildcard inside the segment '{1}'")]
    EmbeddedWildcard(String, String),
}

/// A single parsed segment of a [`TopicPattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PatternSegment {
    /// Matches this exact segment.
    Literal(Box<str>),
    /// `*`: matches any single segment.
    Single,
    /// `#`: matches any run of zero or more segments.
    Multi,
}

impl Topic {
    /// Parses the given string into a [`Topic`], rejecting empty segments and
    /// wildcard characters.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TopicError> {
        let input = input.as_ref();

        for segment in input.split('.') {
            if segment.is_empty() {
                return Err(TopicError::EmptySegment(input.to_string()));
            }
            if segment.contains('*') {
                return Err(TopicError::UnexpectedWildcard(input.to_string(), '*'));
            }
            if segment.contains('#') {
                return Err(TopicError::UnexpectedWildcard(input.to_string(), '#'));
            }
        }

        Ok(Self {
            raw: Arc::from(input),
        })
    }

    /// Exposes this topic as a string slice.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Iterates over the dot-separated segments of this topic.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.raw.split('.')
    }
}

impl TopicPattern {
    /// Parses the given string into a [`TopicPattern`], rejecting empty
    /// segments and wildcards embedded inside longer segments.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TopicError> {
        let input = input.as_ref();
        let mut segments = Vec::new();

        for segment in input.split('.') {
            let parsed = match segment {
                "" => return Err(TopicError::EmptySegment(input.to_string())),
                "*" => PatternSegment::Single,
                "#" => PatternSegment::Multi,
                literal => {
                    if literal.contains('*') || literal.contains('#') {
                        return Err(TopicError::EmbeddedWildcard(
                            input.to_string(),
                            literal.to_string(),
                        ));
                    }
                    PatternSegment::Literal(Box::from(literal))
                }
            };

            segments.push(parsed);
        }

        Ok(Self {
            raw: Arc::from(input),
            segments,
        })
    }

    /// Exposes this pattern as a string slice, exactly as it was parsed. This
    /// is also the form handed to the broker as a binding key.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Reports whether this pattern contains any wildcard segments.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, PatternSegment::Literal(_)))
    }

    /// Reports whether this pattern matches the given [`Topic`].
    ///
    /// `*` consumes exactly one topic segment; `#` consumes any (possibly
    /// empty) run of segments. The match is anchored at both ends.
    pub fn matches(&self, topic: &Topic) -> bool {
        let topic_segments = topic.segments().collect::<Vec<_>>();

        Self::matches_recursive(&self.segments, &topic_segments)
    }

    /// The recursive core of the matcher.
    fn matches_recursive(pattern: &[PatternSegment], topic: &[&str]) -> bool {
        let Some((head, pattern_rest)) = pattern.split_first() else {
            // Pattern exhausted: a match iff the topic is exhausted too
            return topic.is_empty();
        };

        match head {
            PatternSegment::Multi => {
                // '#' either matches zero segments here, or swallows one
                // topic segment and stays in play
                Self::matches_recursive(pattern_rest, topic)
                    || !topic.is_empty() && Self::matches_recursive(pattern, &topic[1..])
            }
            PatternSegment::Single => match topic.split_first() {
                Some((_, topic_rest)) => Self::matches_recursive(pattern_rest, topic_rest),
                None => false,
            },
            PatternSegment::Literal(literal) => match topic.split_first() {
                Some((segment, topic_rest)) => {
                    literal.as_ref() == *segment
                        && Self::matches_recursive(pattern_rest, topic_rest)
                }
                None => false,
            },
        }
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl FromStr for TopicPattern {
    type Err = TopicError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl TryFrom<&str> for Topic {
    type Error = TopicError;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        Self::parse(input)
    }
}

impl TryFrom<&str> for TopicPattern {
    type Error = TopicError;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        Self::parse(input)
    }
}

/// Every valid topic is also a valid (fully literal) pattern.
impl From<&Topic> for TopicPattern {
    fn from(topic: &Topic) -> Self {
        let segments = topic
            .segments()
            .map(|segment| PatternSegment::Literal(Box::from(segment)))
            .collect();

        Self {
            raw: Arc::clone(&topic.raw),
            segments,
        }
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Display for TopicPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

const _: () = {
    impl Serialize for Topic {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&self.raw)
        }
    }

    impl<'de> Deserialize<'de> for Topic {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = String::deserialize(deserializer)?;

            Self::parse(&raw).map_err(DeError::custom)
        }
    }

    impl Serialize for TopicPattern {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&self.raw)
        }
    }

    impl<'de> Deserialize<'de> for TopicPattern {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = String::deserialize(deserializer)?;

            Self::parse(&raw).map_err(DeError::custom)
        }
    }
};
