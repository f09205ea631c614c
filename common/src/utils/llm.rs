use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use std::time::Duration;

use crate::{error::AppError, utils::config::LlmConfig};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LlmInfo {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1_024,
        }
    }
}

/// Client for the locally hosted chat-completion endpoint.
#[derive(Clone)]
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        let openai_config = OpenAIConfig::new().with_api_base(config.base_url.clone());
        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
        }
    }

    pub fn info(&self) -> LlmInfo {
        LlmInfo {
            provider: "local".to_string(),
            model: self.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Free-form generation. A deadline expiry is surfaced as
    /// `GenerationFailed` so the caller can return it to the user.
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
        params: GenerationParams,
        deadline: Duration,
    ) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(params.temperature)
            .max_completion_tokens(params.max_tokens)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_prompt).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .build()?;

        let response = tokio::time::timeout(deadline, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AppError::GenerationFailed(format!(
                    "LLM generation exceeded deadline of {}ms",
                    deadline.as_millis()
                ))
            })?
            .map_err(|e| AppError::GenerationFailed(e.to_string()))?;

        extract_content(response)
    }

    /// Generation constrained to a JSON schema, used when the output is
    /// parsed into typed extractions.
    pub async fn generate_structured(
        &self,
        system_prompt: &str,
        user_message: &str,
        schema_name: &str,
        schema: serde_json::Value,
        params: GenerationParams,
        deadline: Duration,
    ) -> Result<String, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Grounded clinical question answering".into()),
                name: schema_name.into(),
                schema: Some(schema),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(params.temperature)
            .max_completion_tokens(params.max_tokens)
            .messages([
                ChatCompletionRequestSystemMessage::from(system_prompt).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .response_format(response_format)
            .build()?;

        let response = tokio::time::timeout(deadline, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AppError::GenerationFailed(format!(
                    "LLM generation exceeded deadline of {}ms",
                    deadline.as_millis()
                ))
            })?
            .map_err(|e| AppError::GenerationFailed(e.to_string()))?;

        extract_content(response)
    }

    pub async fn health(&self) -> bool {
        self.client.models().list().await.is_ok()
    }
}

fn extract_content(response: CreateChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(AppError::LLMParsing(
            "No content found in LLM response".into(),
        ))
}
