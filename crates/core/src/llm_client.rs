use crate::context::ContextSnapshotProvider;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, ImageDetail, ImageUrlArgs,
    },
};
use async_trait::async_trait;
use base64::Engine;
use tracing::{debug, instrument};

/// An inline image attached to a one-shot query.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl InlineImage {
    /// Encodes the image as a `data:` URL.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// A single, non-streaming question about an image.
#[derive(Debug, Clone)]
pub struct MultimodalQuery {
    pub image: InlineImage,
    pub prompt: String,
}

/// A client for one-shot multimodal questions, outside any live session.
#[async_trait]
pub trait MultimodalClient: Send + Sync {
    async fn ask(&self, query: MultimodalQuery) -> Result<String>;
}

/// An implementation of `MultimodalClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    context: ContextSnapshotProvider,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL.
    /// * `model` - The chat model identifier (e.g., "gemini-2.5-flash").
    /// * `context` - Host-state digest prepended to every query as grounding.
    pub fn new(config: OpenAIConfig, model: String, context: ContextSnapshotProvider) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            context,
        }
    }

    async fn build_messages(&self, query: &MultimodalQuery) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::with_capacity(2);
        let grounding = self.context.grounding_text().await;
        if !grounding.is_empty() {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(format!(
                        "The user's workspace currently contains:\n{}",
                        grounding
                    ))
                    .build()?
                    .into(),
            );
        }

        let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(query.prompt.clone())
                .build()?
                .into(),
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(
                    ImageUrlArgs::default()
                        .url(query.image.to_data_url())
                        .detail(ImageDetail::Auto)
                        .build()?,
                )
                .build()?
                .into(),
        ];
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()?
                .into(),
        );
        Ok(messages)
    }
}

#[async_trait]
impl MultimodalClient for OpenAICompatibleClient {
    #[instrument(skip_all, fields(model = %self.model, mime = %query.image.mime_type))]
    async fn ask(&self, query: MultimodalQuery) -> Result<String> {
        let messages = self.build_messages(&query).await?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()?;

        let response: CreateChatCompletionResponse = self.client.chat().create(request).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("Multimodal response had no text content")?;
        debug!(chars = text.len(), "Multimodal query answered");
        Ok(text)
    }
}
