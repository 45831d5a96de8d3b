//! Consumer wire messages (JSON).
//!
//! ```text
//! -> {"type":"subscribe","tags":["ca://SR:CURRENT","gain"]}
//! -> {"type":"unsubscribe","tags":["gain"]}
//! -> {"type":"write","tag":"gain","value":2.5}
//! <- {"type":"update","tag":"gain","value":2.5,"alarm":{"severity":"NO_ALARM"},
//!     "timeStamp":{"secondsPastEpoch":1700000000,"nanoseconds":0}}
//! <- {"type":"warning","message":"...","tag":"gain"}
//! <- {"type":"error","message":"...","tag":"gain"}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::{SampleMeta, Tag, TagSample, TagValue};
use crate::error::{BrokerError, BrokerWarning, SessionError};
use crate::ports::TagUpdate;

/// Message sent by a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { tags: Vec<Tag> },
    Unsubscribe { tags: Vec<Tag> },
    Write { tag: Tag, value: TagValue },
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Message sent to a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// A fresh sample; metadata fields sit next to `value` and are omitted
    /// when the provider supplied none.
    Update {
        tag: Tag,
        value: TagValue,
        #[serde(flatten)]
        meta: SampleMeta,
    },
    Warning {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<Tag>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<Tag>,
    },
}

impl ServerMessage {
    pub fn update(tag: Tag, sample: TagSample) -> Self {
        let TagSample { value, meta } = sample;
        ServerMessage::Update { tag, value, meta }
    }

    pub fn warning(warning: &BrokerWarning) -> Self {
        let tag = match warning {
            BrokerWarning::WriteToUnsubscribedTag { tag } => Some(tag.clone()),
        };
        ServerMessage::Warning {
            message: warning.to_string(),
            tag,
        }
    }

    pub fn error(error: &BrokerError) -> Self {
        let tag = match error {
            BrokerError::ProviderOpen { tag, .. }
            | BrokerError::ProviderClose { tag, .. }
            | BrokerError::ProviderWrite { tag, .. } => Some(tag.clone()),
            BrokerError::ShutDown => None,
        };
        ServerMessage::Error {
            message: error.to_string(),
            tag,
        }
    }

    /// An error about the message itself rather than a tag.
    pub fn rejected(error: &SessionError) -> Self {
        ServerMessage::Error {
            message: error.to_string(),
            tag: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<TagUpdate> for ServerMessage {
    fn from(update: TagUpdate) -> Self {
        ServerMessage::Update {
            tag: update.tag,
            value: update.value,
            meta: update.meta,
        }
    }
}
