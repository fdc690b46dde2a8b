// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The topic-template parser (component N): substitutes `{token}` placeholders
//! into a concrete topic, derives the `+`-wildcarded subscribe filter for the
//! same template, and parses token values back out of a matching topic.

use std::collections::HashMap;

use regex::Regex;

/// Wildcard token used in subscribe topics.
pub const WILDCARD: &str = "+";

/// Seed for the DJB2 token-name hash used to key the fast-path lookup in
/// [`TopicPattern::parse_tokens`]; substitution itself stays `O(n)` in the
/// topic length because each template is compiled once, in [`TopicPattern::new`].
const DJB2_SEED: u32 = 5831;
const DJB2_SHIFT: u32 = 5;

/// DJB2 hash of `s`, seeded at [`DJB2_SEED`] with a bit-shift of [`DJB2_SHIFT`].
#[must_use]
pub fn djb2_hash(s: &str) -> u32 {
    let mut hash = DJB2_SEED;
    for byte in s.bytes() {
        hash = (hash.wrapping_shl(DJB2_SHIFT).wrapping_add(hash)).wrapping_add(u32::from(byte));
    }
    hash
}

/// Errors building or rendering a [`TopicPattern`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicTemplateError {
    /// The pattern was empty or all whitespace.
    #[error("topic pattern must not be empty")]
    Empty,
    /// The pattern started with a reserved `$` character.
    #[error("topic pattern '{0}' starts with reserved character '$'")]
    ReservedPrefix(String),
    /// The pattern contained non-ASCII characters.
    #[error("topic pattern '{0}' contains non-ASCII characters")]
    NonAscii(String),
    /// The pattern had an empty level (`//`, or a leading/trailing `/`).
    #[error("topic pattern '{0}' contains an empty level")]
    EmptyLevel(String),
    /// The topic namespace was not a valid replacement value.
    #[error("topic namespace '{0}' is not a valid replacement value")]
    InvalidNamespace(String),
    /// Two tokens were adjacent with nothing separating them (`{a}{b}`).
    #[error("topic pattern '{0}' contains adjacent tokens")]
    AdjacentTokens(String),
    /// A literal (non-token) segment contained a reserved character.
    #[error("topic pattern '{0}' contains invalid characters")]
    InvalidCharacters(String),
    /// A token name contained a reserved character or a `/`.
    #[error("topic pattern contains invalid characters in token '{0}'")]
    InvalidToken(String),
    /// A token's statically-bound replacement value was not a valid
    /// replacement (empty, contains `/` at the edges, reserved characters, ...).
    #[error("token '{token}' has invalid replacement value '{value}'")]
    InvalidReplacement {
        /// The token name.
        token: String,
        /// The rejected value.
        value: String,
    },
    /// A token had no replacement value at publish time.
    #[error("token '{0}' has no replacement value")]
    MissingReplacement(String),
}

/// Check if a string contains characters the topic-structure convention
/// disallows in a literal segment: non-ASCII, outside `'!'..='~'`, or one of
/// `+ # { }`.
#[must_use]
pub fn contains_invalid_char(s: &str) -> bool {
    s.chars()
        .any(|c| !c.is_ascii() || !('!'..='~').contains(&c) || matches!(c, '+' | '#' | '{' | '}'))
}

/// Whether `s` is valid as a token replacement value or topic namespace:
/// non-empty, none of [`contains_invalid_char`], and no leading/trailing/doubled `/`.
#[must_use]
pub fn is_valid_replacement(s: &str) -> bool {
    !(s.is_empty()
        || contains_invalid_char(s)
        || s.starts_with('/')
        || s.ends_with('/')
        || s.contains("//"))
}

/// A compiled topic template: a literal string containing `{token}`
/// placeholders, with any namespace and statically-known token values
/// already substituted in.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    topic_pattern: String,
    pattern_regex: Regex,
}

impl TopicPattern {
    /// Compile a topic template.
    ///
    /// `token_map` supplies replacement values known at construction time
    /// (e.g. a fixed `modelId`); any token not present there is left as a
    /// placeholder for [`TopicPattern::as_publish_topic`] to fill in later.
    ///
    /// # Errors
    /// Returns a [`TopicTemplateError`] if the pattern, namespace, or any
    /// statically-bound replacement violates the topic-structure convention.
    pub fn new(
        pattern: &str,
        topic_namespace: Option<&str>,
        token_map: &HashMap<String, String>,
    ) -> Result<Self, TopicTemplateError> {
        if pattern.trim().is_empty() {
            return Err(TopicTemplateError::Empty);
        }
        if pattern.starts_with('$') {
            return Err(TopicTemplateError::ReservedPrefix(pattern.to_string()));
        }
        if !pattern.is_ascii() {
            return Err(TopicTemplateError::NonAscii(pattern.to_string()));
        }

        let pattern_as_bytes = pattern.as_bytes();

        let empty_level_regex =
            Regex::new(r"((^\s*/)|(/\s*/)|(/\s*$))").expect("static regex");
        if empty_level_regex.is_match(pattern) {
            return Err(TopicTemplateError::EmptyLevel(pattern.to_string()));
        }

        let mut working_pattern = String::new();
        if let Some(topic_namespace) = topic_namespace {
            if !is_valid_replacement(topic_namespace) {
                return Err(TopicTemplateError::InvalidNamespace(topic_namespace.to_string()));
            }
            working_pattern.push_str(topic_namespace);
            working_pattern.push('/');
        }

        let token_regex = Regex::new(r"(?P<token>\{[^}]+\})").expect("static regex");
        let invalid_regex = Regex::new(r"([^\x21-\x7E]|[+#{}])").expect("static regex");

        let mut last_match = 0;
        for caps in token_regex.captures_iter(pattern) {
            let token_capture = caps.name("token").expect("token group always present");
            let token = token_capture.as_str();

            if token.trim().is_empty() {
                return Err(TopicTemplateError::InvalidCharacters(pattern.to_string()));
            }
            if let Some(b'{') = pattern_as_bytes.get(token_capture.end()).copied() {
                return Err(TopicTemplateError::AdjacentTokens(pattern.to_string()));
            }

            let literal = &pattern[last_match..token_capture.start()];
            if invalid_regex.is_match(literal) {
                return Err(TopicTemplateError::InvalidCharacters(pattern.to_string()));
            }
            working_pattern.push_str(literal);

            let stripped_token = &token[1..token.len() - 1];
            if invalid_regex.is_match(stripped_token) || stripped_token.contains('/') {
                return Err(TopicTemplateError::InvalidToken(stripped_token.to_string()));
            }

            if let Some(val) = token_map.get(stripped_token) {
                if !is_valid_replacement(val) {
                    return Err(TopicTemplateError::InvalidReplacement {
                        token: stripped_token.to_string(),
                        value: val.to_string(),
                    });
                }
                working_pattern.push_str(val);
            } else {
                working_pattern.push_str(token);
            }
            last_match = token_capture.end();
        }

        let trailer = &pattern[last_match..];
        if invalid_regex.is_match(trailer) {
            return Err(TopicTemplateError::InvalidCharacters(pattern.to_string()));
        }
        working_pattern.push_str(trailer);

        Ok(TopicPattern {
            topic_pattern: working_pattern,
            pattern_regex: token_regex,
        })
    }

    /// The `+`-wildcarded topic filter used to subscribe for this template.
    #[must_use]
    pub fn as_subscribe_topic(&self) -> String {
        self.pattern_regex
            .replace_all(&self.topic_pattern, WILDCARD)
            .to_string()
    }

    /// Render a concrete publish topic, filling in every remaining token from
    /// `tokens`.
    ///
    /// # Errors
    /// Returns [`TopicTemplateError::MissingReplacement`] if a token has no
    /// entry in `tokens`, or [`TopicTemplateError::InvalidReplacement`] if its
    /// value is not a valid replacement.
    pub fn as_publish_topic(&self, tokens: &HashMap<String, String>) -> Result<String, TopicTemplateError> {
        let mut publish_topic = String::with_capacity(self.topic_pattern.len());
        let mut last_match = 0;

        for caps in self.pattern_regex.captures_iter(&self.topic_pattern) {
            let key_cap = caps.name("token").expect("token group always present");
            let key = &key_cap.as_str()[1..key_cap.as_str().len() - 1];
            publish_topic.push_str(&self.topic_pattern[last_match..key_cap.start()]);

            let Some(val) = tokens.get(key) else {
                return Err(TopicTemplateError::MissingReplacement(key.to_string()));
            };
            if !is_valid_replacement(val) {
                return Err(TopicTemplateError::InvalidReplacement {
                    token: key.to_string(),
                    value: val.to_string(),
                });
            }
            publish_topic.push_str(val);
            last_match = key_cap.end();
        }
        publish_topic.push_str(&self.topic_pattern[last_match..]);
        Ok(publish_topic)
    }

    /// Parse each token's value out of a concrete topic that matches this
    /// template's wildcard positions.
    #[must_use]
    pub fn parse_tokens(&self, topic: &str) -> HashMap<String, String> {
        let mut tokens = HashMap::new();
        let mut topic_ref = topic;
        let mut last_token_end = 0;

        for find in self.pattern_regex.find_iter(&self.topic_pattern) {
            let token_start = find.start();
            let token_end = find.end();
            let value_start = token_start - last_token_end;
            last_token_end = token_end + 1;

            topic_ref = &topic_ref[value_start..];
            let (value, rest) = topic_ref.split_once('/').unwrap_or((topic_ref, ""));
            topic_ref = rest;

            tokens.insert(
                find.as_str()[1..find.as_str().len() - 1].to_string(),
                value.to_string(),
            );
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("test", "test"; "no token")]
    #[test_case("test/test", "test/test"; "no token multiple levels")]
    #[test_case("{wildToken}", "{wildToken}"; "only wildcard")]
    #[test_case("{testToken}", "testRepl"; "only token")]
    #[test_case("test/{testToken}", "test/testRepl"; "token at end")]
    #[test_case("{testToken}/test", "testRepl/test"; "token at start")]
    #[test_case("test/{testToken}/test", "test/testRepl/test"; "token in middle")]
    fn valid_patterns_render_bound_tokens(pattern: &str, result: &str) {
        let token_map = HashMap::from([("testToken".to_string(), "testRepl".to_string())]);
        let pattern = TopicPattern::new(pattern, None, &token_map).unwrap();
        assert_eq!(pattern.topic_pattern, result);
    }

    #[test_case(""; "empty")]
    #[test_case(" "; "whitespace")]
    #[test_case("$invalidPattern/{testToken}"; "starts with dollar")]
    #[test_case("/invalidPattern/{testToken}"; "starts with slash")]
    #[test_case("{testToken}/invalidPattern/"; "ends with slash")]
    #[test_case("invalid//Pattern/{testToken}"; "contains double slash")]
    #[test_case("{testToken}{testToken}"; "adjacent tokens")]
    fn invalid_patterns_are_rejected(pattern: &str) {
        let token_map = HashMap::from([("testToken".to_string(), "testRepl".to_string())]);
        assert!(TopicPattern::new(pattern, None, &token_map).is_err());
    }

    #[test_case("test", "test"; "no token")]
    #[test_case("{wildToken}", "+"; "single token")]
    #[test_case("test/{wildToken}/test", "test/+/test"; "token in middle")]
    #[test_case("{wildToken1}/{wildToken2}", "+/+"; "multiple wildcards")]
    fn subscribe_topic_wildcards_every_unbound_token(pattern: &str, result: &str) {
        let pattern = TopicPattern::new(pattern, None, &HashMap::new()).unwrap();
        assert_eq!(pattern.as_subscribe_topic(), result);
    }

    #[test]
    fn publish_topic_fills_remaining_tokens() {
        let pattern = TopicPattern::new(
            "services/{modelId}/{executorId}/command/{commandName}/request",
            None,
            &HashMap::from([("modelId".to_string(), "vehicle03".to_string())]),
        )
        .unwrap();
        let topic = pattern
            .as_publish_topic(&HashMap::from([
                ("executorId".to_string(), "exec1".to_string()),
                ("commandName".to_string(), "unlock".to_string()),
            ]))
            .unwrap();
        assert_eq!(topic, "services/vehicle03/exec1/command/unlock/request");
    }

    #[test]
    fn publish_topic_missing_replacement_is_an_error() {
        let pattern = TopicPattern::new("test/{testToken}", None, &HashMap::new()).unwrap();
        let err = pattern.as_publish_topic(&HashMap::new()).unwrap_err();
        assert_eq!(err, TopicTemplateError::MissingReplacement("testToken".to_string()));
    }

    #[test]
    fn substitute_then_parse_round_trips() {
        let template = "services/{modelId}/{executorId}/command/{commandName}/request";
        let values = HashMap::from([
            ("modelId".to_string(), "vehicle03".to_string()),
            ("executorId".to_string(), "exec1".to_string()),
            ("commandName".to_string(), "unlock".to_string()),
        ]);
        let pattern = TopicPattern::new(template, None, &HashMap::new()).unwrap();
        let topic = pattern.as_publish_topic(&values).unwrap();
        assert_eq!(pattern.parse_tokens(&topic), values);
    }

    #[test]
    fn djb2_hash_is_deterministic_and_seeded() {
        assert_eq!(djb2_hash("modelId"), djb2_hash("modelId"));
        assert_ne!(djb2_hash("modelId"), djb2_hash("executorId"));
    }
}
