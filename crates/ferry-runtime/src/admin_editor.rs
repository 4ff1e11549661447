//! Template editor contract: load, save, publish.
//!
//! Saving validates the template by rendering it once, so malformed button
//! tags or color values are rejected before they are persisted. Publishing
//! is idempotent: a template that was already published edits its previous
//! message in place instead of posting a duplicate panel, and follows the
//! template when its target channel changes.

use std::sync::Arc;

use ferry_core::{FerryError, RetryPolicy};
use ferry_state::{MessageRef, PostTemplate, TemplateStore};

use ferry_engine::platform_contract::ChannelPlatformClient;
use ferry_engine::post_template::render_post_template;

pub struct AdminEditor {
    templates: TemplateStore,
    channel: Arc<dyn ChannelPlatformClient>,
    retry: RetryPolicy,
}

impl AdminEditor {
    pub fn new(
        templates: TemplateStore,
        channel: Arc<dyn ChannelPlatformClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            templates,
            channel,
            retry,
        }
    }

    pub fn load_template(&self, name: &str) -> Option<PostTemplate> {
        self.templates.get(name)
    }

    pub fn list_template_names(&self) -> Vec<String> {
        self.templates.list_names()
    }

    /// Validates and persists a template. The rendered output is discarded;
    /// only publishable templates are storable.
    pub fn save_template(&self, template: PostTemplate) -> Result<(), FerryError> {
        render_post_template(&template)?;
        self.templates
            .set(template)
            .map_err(|error| FerryError::persistence(error.to_string()))
    }

    /// Renders and posts a template to its channel. Republishing overwrites
    /// the previous message; a previous message that was deleted upstream or
    /// lives in a different channel is replaced by a fresh post.
    pub async fn publish_template(&self, name: &str) -> Result<MessageRef, FerryError> {
        let mut template = self
            .templates
            .get(name)
            .ok_or_else(|| FerryError::mirror_not_found(format!("template {name}")))?;
        let rendered = render_post_template(&template)?;

        if let Some(previous) = template.last_published.clone() {
            if previous.conversation == template.channel_id {
                match self
                    .channel
                    .edit_message(&previous.conversation, &previous.message_id, &rendered)
                    .await
                {
                    Ok(()) => return Ok(previous),
                    Err(FerryError::MirrorNotFound { .. }) => {
                        tracing::info!(template = name, "published message vanished; reposting");
                    }
                    Err(error) => return Err(error),
                }
            } else if let Err(error) = self
                .channel
                .delete_message(&previous.conversation, &previous.message_id)
                .await
            {
                tracing::info!(template = name, %error, "stale publish cleanup skipped");
            }
        }

        let message_id = self
            .retry
            .run(|| {
                let rendered = rendered.clone();
                let channel_id = template.channel_id.clone();
                async move { self.channel.send_message(&channel_id, &rendered).await }
            })
            .await?;
        let published = MessageRef::new(template.channel_id.clone(), message_id);
        template.last_published = Some(published.clone());
        self.templates
            .set(template)
            .map_err(|error| FerryError::persistence(error.to_string()))?;
        Ok(published)
    }
}
