use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::UnknownChannel;

/// Outbound delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Sms, Channel::Email, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            "push" => Ok(Channel::Push),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// Payload handed to a provider gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub notification_id: String,
}

impl DeliveryRequest {
    pub fn new(
        notification_id: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: None,
            body: body.into(),
            notification_id: notification_id.into(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// What a provider gateway reports back for one send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub provider_id: String,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,

    /// Retrying cannot help (e.g. invalid recipient)
    #[serde(default)]
    pub permanent: bool,
}

impl DeliveryResult {
    pub fn delivered(provider_id: impl Into<String>, provider_message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_id: provider_id.into(),
            provider_message_id: Some(provider_message_id.into()),
            error_message: None,
            permanent: false,
        }
    }

    pub fn failed(provider_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_id: provider_id.into(),
            provider_message_id: None,
            error_message: Some(error_message.into()),
            permanent: false,
        }
    }

    pub fn rejected(provider_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            permanent: true,
            ..Self::failed(provider_id, error_message)
        }
    }
}

/// An inbound request to deliver one notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub tenant_id: Option<String>,
    pub user_id: String,
    pub service_origin: String,
    pub channel: Channel,
    pub delivery: DeliveryRequest,

    /// Scope the caller presented after upstream verification
    #[serde(default)]
    pub elevated_scope: Option<String>,
}

impl SendRequest {
    pub fn new(
        tenant_id: Option<&str>,
        user_id: impl Into<String>,
        service_origin: impl Into<String>,
        channel: Channel,
        delivery: DeliveryRequest,
    ) -> Self {
        Self {
            tenant_id: tenant_id.map(str::to_string),
            user_id: user_id.into(),
            service_origin: service_origin.into(),
            channel,
            delivery,
            elevated_scope: None,
        }
    }

    pub fn with_elevated_scope(mut self, scope: impl Into<String>) -> Self {
        self.elevated_scope = Some(scope.into());
        self
    }
}
