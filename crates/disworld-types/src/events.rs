use serde::{Deserialize, Serialize};

use crate::models::{ChannelId, MessageId, UserId};

// -- Gateway opcodes --

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

pub const INTENT_GUILDS: u64 = 1 << 0;
pub const INTENT_GUILD_MESSAGES: u64 = 1 << 9;

/// Permission bit required to create or remove a map.
pub const PERMISSION_MANAGE_CHANNELS: u64 = 1 << 4;

/// Interaction types we care about.
pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;

/// Raw frame exchanged with the Discord gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn heartbeat(seq: Option<u64>) -> Self {
        Self {
            op: OP_HEARTBEAT,
            d: serde_json::json!(seq),
            s: None,
            t: None,
        }
    }

    pub fn identify(token: &str, intents: u64) -> Self {
        Self {
            op: OP_IDENTIFY,
            d: serde_json::json!({
                "token": token,
                "intents": intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "disworld",
                    "device": "disworld",
                },
            }),
            s: None,
            t: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user: Option<User>,
    /// Effective permissions in the invoking channel, as a decimal string.
    #[serde(default)]
    pub permissions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionData {
    pub name: String,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub application_id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub token: String,
    #[serde(default)]
    pub data: Option<InteractionData>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub member: Option<Member>,
    /// Only present for interactions outside a guild.
    #[serde(default)]
    pub user: Option<User>,
}

impl Interaction {
    pub fn invoker_id(&self) -> Option<&str> {
        self.member
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
            .map(|u| u.id.as_str())
    }

    pub fn member_permissions(&self) -> u64 {
        self.member
            .as_ref()
            .and_then(|m| m.permissions.as_deref())
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDelete {
    pub id: MessageId,
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeleteBulk {
    pub ids: Vec<MessageId>,
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDelete {
    pub id: ChannelId,
}

/// Decoded gateway dispatches forwarded to the bot's event loop.
#[derive(Debug, Clone)]
pub enum BotEvent {
    /// Session established
    Ready { user_id: UserId, username: String },

    /// A slash command was invoked
    InteractionCreate(Interaction),

    /// A message was deleted in some channel
    MessageDelete {
        channel_id: ChannelId,
        message_id: MessageId,
    },

    /// Several messages were deleted at once (moderator purge)
    MessageDeleteBulk {
        channel_id: ChannelId,
        message_ids: Vec<MessageId>,
    },

    /// A channel was deleted
    ChannelDelete { channel_id: ChannelId },
}

impl BotEvent {
    /// Decode a dispatch by its event name. Unhandled names yield `None`.
    pub fn from_dispatch(name: &str, data: serde_json::Value) -> serde_json::Result<Option<Self>> {
        let event = match name {
            "READY" => {
                let ready: Ready = serde_json::from_value(data)?;
                Self::Ready {
                    user_id: ready.user.id,
                    username: ready.user.username,
                }
            }
            "INTERACTION_CREATE" => Self::InteractionCreate(serde_json::from_value(data)?),
            "MESSAGE_DELETE" => {
                let deleted: MessageDelete = serde_json::from_value(data)?;
                Self::MessageDelete {
                    channel_id: deleted.channel_id,
                    message_id: deleted.id,
                }
            }
            "MESSAGE_DELETE_BULK" => {
                let deleted: MessageDeleteBulk = serde_json::from_value(data)?;
                Self::MessageDeleteBulk {
                    channel_id: deleted.channel_id,
                    message_ids: deleted.ids,
                }
            }
            "CHANNEL_DELETE" => {
                let deleted: ChannelDelete = serde_json::from_value(data)?;
                Self::ChannelDelete {
                    channel_id: deleted.id,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
