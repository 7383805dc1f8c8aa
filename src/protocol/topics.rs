//! Shadow and event topic construction/parsing
//!
//! All shadow traffic follows the AWS IoT named-shadow convention:
//! `<prefix>/things/<thing>/shadow/name/<shadow>/{get|update}[/accepted|/rejected]`.
//! Reply topics are classified once, on receipt, instead of re-matching every
//! registered pattern per message.

use thiserror::Error;

/// Request kind of a shadow round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowOperation {
    Get,
    Update,
}

impl ShadowOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowOperation::Get => "get",
            ShadowOperation::Update => "update",
        }
    }
}

impl std::fmt::Display for ShadowOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker verdict carried by a reply topic suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDisposition {
    Accepted,
    Rejected,
}

/// A fully parsed shadow reply topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowReply {
    pub thing_name: String,
    pub shadow_name: String,
    pub operation: ShadowOperation,
    pub disposition: ReplyDisposition,
}

/// Topic construction errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("thing name must not be empty")]
    EmptyThingName,
    #[error("shadow name must not be empty")]
    EmptyShadowName,
}

/// Shadow topic construction for one configured prefix
#[derive(Debug, Clone)]
pub struct TopicBuilder {
    prefix: String,
}

impl TopicBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn base(&self, thing_name: &str, shadow_name: &str) -> String {
        format!(
            "{}/things/{}/shadow/name/{}",
            self.prefix, thing_name, shadow_name
        )
    }

    /// Topic the request body is published to
    pub fn request_topic(
        &self,
        thing_name: &str,
        shadow_name: &str,
        operation: ShadowOperation,
    ) -> Result<String, TopicError> {
        if thing_name.is_empty() {
            return Err(TopicError::EmptyThingName);
        }
        if shadow_name.is_empty() {
            return Err(TopicError::EmptyShadowName);
        }
        Ok(format!(
            "{}/{}",
            self.base(thing_name, shadow_name),
            operation.as_str()
        ))
    }

    /// Reply topic the broker publishes the success body to
    pub fn accepted_topic(
        &self,
        thing_name: &str,
        shadow_name: &str,
        operation: ShadowOperation,
    ) -> Result<String, TopicError> {
        Ok(format!(
            "{}/accepted",
            self.request_topic(thing_name, shadow_name, operation)?
        ))
    }

    /// Reply topic the broker publishes the error body to
    pub fn rejected_topic(
        &self,
        thing_name: &str,
        shadow_name: &str,
        operation: ShadowOperation,
    ) -> Result<String, TopicError> {
        Ok(format!(
            "{}/rejected",
            self.request_topic(thing_name, shadow_name, operation)?
        ))
    }

    /// Parse an inbound topic as a shadow reply, if it is one.
    ///
    /// Unsolicited event topics (plain `.../update` subscriptions) do not
    /// match and flow to the event router instead.
    pub fn classify_reply(&self, topic: &str) -> Option<ShadowReply> {
        let rest = topic.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix("/things/")?;

        let (thing_name, rest) = rest.split_once("/shadow/name/")?;
        let mut segments = rest.rsplitn(3, '/');

        let disposition = match segments.next()? {
            "accepted" => ReplyDisposition::Accepted,
            "rejected" => ReplyDisposition::Rejected,
            _ => return None,
        };
        let operation = match segments.next()? {
            "get" => ShadowOperation::Get,
            "update" => ShadowOperation::Update,
            _ => return None,
        };
        let shadow_name = segments.next()?;

        if thing_name.is_empty() || shadow_name.is_empty() || shadow_name.contains('/') {
            return None;
        }

        Some(ShadowReply {
            thing_name: thing_name.to_string(),
            shadow_name: shadow_name.to_string(),
            operation,
            disposition,
        })
    }

    /// Update shadow the backend pushes unsolicited events through
    pub fn event_topic(&self, thing_name: &str, event_shadow: &str) -> String {
        format!("{}/update", self.base(thing_name, event_shadow))
    }
}

/// Update shadows carrying unsolicited device events
pub mod event_shadows {
    pub const ALARM: &str = "2nd_safealarm";
    pub const MUTE: &str = "2nd_muteup";
    pub const SELF_TEST: &str = "2nd_selftestup";
}

/// Account-wide topic notifying that another client logged in with the same
/// credentials (forced logout).
pub fn login_notice_topic(user_id: &str) -> String {
    format!("xsense/app/{user_id}/additionalLogin")
}
