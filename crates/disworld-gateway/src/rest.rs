use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use disworld_types::commands::CommandDefinition;
use disworld_types::models::MessageId;

use crate::platform::{ChatPlatform, PlatformError};

const API_BASE: &str = "https://discord.com/api/v10";

/// Interaction callback: deferred channel message with source.
const CALLBACK_DEFERRED: u8 = 5;
/// Message flag: only the invoking user can see it.
const FLAG_EPHEMERAL: u64 = 1 << 6;

#[derive(Deserialize)]
struct CreatedMessage {
    id: MessageId,
}

/// Thin Discord REST client. One instance is shared by every handler.
#[derive(Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    token: String,
    application_id: String,
    api_base: String,
}

impl DiscordClient {
    pub fn new(token: String, application_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            application_id,
            api_base: API_BASE.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn commands_path(&self, guild_id: Option<&str>) -> String {
        match guild_id {
            Some(guild) => format!("/applications/{}/guilds/{}/commands", self.application_id, guild),
            None => format!("/applications/{}/commands", self.application_id),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Bulk-overwrite the application's slash commands, in one guild or globally.
    pub async fn register_commands(
        &self,
        guild_id: Option<&str>,
        commands: &[CommandDefinition],
    ) -> Result<(), PlatformError> {
        let resp = self
            .http
            .put(self.url(&self.commands_path(guild_id)))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .json(commands)
            .send()
            .await?;
        check(resp).await?;

        info!(
            "Registered {} commands {}",
            commands.len(),
            guild_id.map_or("globally".to_string(), |g| format!("in guild {}", g))
        );
        Ok(())
    }
}

/// `payload_json` for a message whose only attachment is `files[0]`.
fn attachment_payload(filename: &str) -> serde_json::Value {
    serde_json::json!({
        "attachments": [{ "id": 0, "filename": filename }],
    })
}

fn image_form(filename: &str, png: Vec<u8>) -> Result<Form, PlatformError> {
    let payload = attachment_payload(filename);
    let part = Part::bytes(png)
        .file_name(filename.to_string())
        .mime_str("image/png")?;
    Ok(Form::new()
        .text("payload_json", payload.to_string())
        .part("files[0]", part))
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> PlatformError {
    if status == StatusCode::NOT_FOUND {
        return PlatformError::NotFound;
    }
    PlatformError::Status {
        status: status.as_u16(),
        body: body.chars().take(300).collect(),
    }
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    async fn post_image(
        &self,
        channel_id: &str,
        filename: &str,
        png: Vec<u8>,
    ) -> Result<MessageId, PlatformError> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/messages", channel_id)))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .multipart(image_form(filename, png)?)
            .send()
            .await?;
        let created: CreatedMessage = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))?;

        debug!("Posted map message {} in channel {}", created.id, channel_id);
        Ok(created.id)
    }

    async fn edit_image(
        &self,
        channel_id: &str,
        message_id: &str,
        filename: &str,
        png: Vec<u8>,
    ) -> Result<(), PlatformError> {
        // Listing only the new attachment drops the old one.
        let resp = self
            .http
            .patch(self.url(&format!("/channels/{}/messages/{}", channel_id, message_id)))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .multipart(image_form(filename, png)?)
            .send()
            .await?;
        check(resp).await?;
        debug!("Edited map message {} in channel {}", message_id, channel_id);
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), PlatformError> {
        let resp = self
            .http
            .delete(self.url(&format!("/channels/{}/messages/{}", channel_id, message_id)))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn message_exists(&self, channel_id: &str, message_id: &str) -> Result<bool, PlatformError> {
        let resp = self
            .http
            .get(self.url(&format!("/channels/{}/messages/{}", channel_id, message_id)))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .send()
            .await?;
        match check(resp).await {
            Ok(_) => Ok(true),
            Err(PlatformError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn defer_reply(&self, interaction_id: &str, token: &str) -> Result<(), PlatformError> {
        let body = serde_json::json!({
            "type": CALLBACK_DEFERRED,
            "data": { "flags": FLAG_EPHEMERAL },
        });
        let resp = self
            .http
            .post(self.url(&format!("/interactions/{}/{}/callback", interaction_id, token)))
            .json(&body)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn edit_reply(&self, token: &str, content: &str) -> Result<(), PlatformError> {
        let resp = self
            .http
            .patch(self.url(&format!(
                "/webhooks/{}/{}/messages/@original",
                self.application_id, token
            )))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_its_own_error() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, r#"{"message": "Unknown Message"}"#),
            PlatformError::NotFound
        ));
    }

    #[test]
    fn other_failures_keep_status_and_trimmed_body() {
        let body = "x".repeat(1000);
        let PlatformError::Status { status, body } = status_error(StatusCode::FORBIDDEN, &body)
        else {
            panic!("expected status error");
        };
        assert_eq!(status, 403);
        assert_eq!(body.len(), 300);
    }

    #[test]
    fn attachment_payload_names_the_file() {
        assert_eq!(
            attachment_payload("disworld-map.png"),
            serde_json::json!({ "attachments": [{ "id": 0, "filename": "disworld-map.png" }] })
        );
        assert!(image_form("disworld-map.png", vec![1, 2, 3]).is_ok());
    }

    #[test]
    fn command_registration_scope() {
        let client = DiscordClient::new("tok".into(), "42".into());
        assert_eq!(client.commands_path(Some("7")), "/applications/42/guilds/7/commands");
        assert_eq!(client.commands_path(None), "/applications/42/commands");
        assert_eq!(
            client.url("/channels/1/messages"),
            "https://discord.com/api/v10/channels/1/messages"
        );
    }
}
