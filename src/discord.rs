//! Discord transport: feed channel messages into the capture pipeline.
//!
//! Every message from a human author is handed to
//! [`CapturePipeline::handle`]; non-triggers are dropped there without a
//! reply. Replies go back to the channel the trigger came from. serenity
//! dispatches each event on its own task, so captures for different
//! messages overlap.

use crate::capture::{CapturePipeline, CaptureRequest};
use crate::delivery::ReplySink;
use crate::error::CaptureError;
use serenity::all::{
    ChannelId, Client, Context, CreateAttachment, CreateMessage, EventHandler, GatewayIntents,
    Http, Message, Ready, UserId,
};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Replies into one Discord channel.
pub struct ChannelReply {
    http: Arc<Http>,
    channel: ChannelId,
}

impl ChannelReply {
    pub fn new(http: Arc<Http>, channel: ChannelId) -> Self {
        Self { http, channel }
    }
}

#[async_trait::async_trait]
impl ReplySink for ChannelReply {
    async fn send_image(&self, filename: &str, png: Vec<u8>) -> Result<(), CaptureError> {
        let attachment = CreateAttachment::bytes(png, filename);
        self.channel
            .send_message(&self.http, CreateMessage::new().add_file(attachment))
            .await
            .map_err(|e| CaptureError::Transport(format!("Discord upload failed: {e}")))?;
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), CaptureError> {
        self.channel
            .say(&self.http, text)
            .await
            .map_err(|e| CaptureError::Transport(format!("Discord send failed: {e}")))?;
        Ok(())
    }
}

struct CaptureHandler {
    pipeline: Arc<CapturePipeline>,
    /// Our own user id, known once the gateway reports ready.
    own_id: OnceLock<UserId>,
}

/// Only the bot's own messages are skipped; other bots may post triggers.
fn is_own_message(own_id: Option<UserId>, author: UserId) -> bool {
    own_id == Some(author)
}

#[serenity::async_trait]
impl EventHandler for CaptureHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Logged in to Discord as {}", ready.user.name);
        let _ = self.own_id.set(ready.user.id);
        if !self.pipeline.is_configured() {
            warn!("Spreadsheet connection is not configured; triggers will be answered with an error");
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if is_own_message(self.own_id.get().copied(), msg.author.id) {
            return;
        }

        let request = CaptureRequest::new(
            msg.content.clone(),
            format!("discord:{}/{}", msg.channel_id, msg.id),
        );
        let reply = ChannelReply::new(Arc::clone(&ctx.http), msg.channel_id);
        self.pipeline.handle(&request, &reply).await;
    }
}

/// Connect to the gateway and process messages until the client stops.
pub async fn run_bot(token: &str, pipeline: Arc<CapturePipeline>) -> Result<(), CaptureError> {
    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(token, intents)
        .event_handler(CaptureHandler {
            pipeline,
            own_id: OnceLock::new(),
        })
        .await
        .map_err(|e| CaptureError::Transport(format!("Discord client setup failed: {e}")))?;

    client
        .start()
        .await
        .map_err(|e| CaptureError::Transport(format!("Discord gateway error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_own_messages_are_skipped() {
        let me = UserId::new(42);
        assert!(is_own_message(Some(me), UserId::new(42)));
        assert!(!is_own_message(Some(me), UserId::new(7)));
        // Before ready nothing is known to be ours.
        assert!(!is_own_message(None, UserId::new(42)));
    }
}
