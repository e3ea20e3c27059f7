use async_trait::async_trait;

use disworld_types::models::MessageId;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("not found")]
    NotFound,
    #[error("discord returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Everything the bot needs from the chat platform.
///
/// Map messages carry a single PNG attachment. Replies to commands go
/// through the interaction token and are always ephemeral.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a new message with `png` attached. Returns the new message id.
    async fn post_image(
        &self,
        channel_id: &str,
        filename: &str,
        png: Vec<u8>,
    ) -> Result<MessageId, PlatformError>;

    /// Replace the attachment on an existing message.
    async fn edit_image(
        &self,
        channel_id: &str,
        message_id: &str,
        filename: &str,
        png: Vec<u8>,
    ) -> Result<(), PlatformError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), PlatformError>;

    /// `Ok(false)` when the platform reports the message gone.
    async fn message_exists(&self, channel_id: &str, message_id: &str) -> Result<bool, PlatformError>;

    /// Acknowledge an interaction with a private "thinking" state.
    async fn defer_reply(&self, interaction_id: &str, token: &str) -> Result<(), PlatformError>;

    /// Set the text of a previously deferred reply.
    async fn edit_reply(&self, token: &str, content: &str) -> Result<(), PlatformError>;
}
