//! Table API client for the hosted backend (PostgREST dialect).
//!
//! Push for the same deployment comes from
//! [`RealtimeSocket`](super::socket::RealtimeSocket).

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    config::ClientConfig,
    models::{Conversation, ConversationSummary, ErrorResponse, Message, NewMessage},
};
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use super::MessageRepository;
use crate::error::{BackendError, BackendResult};

const REST_PREFIX: &str = "rest/v1/";

/// HTTP client for the `messages` and `chats` tables.
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    base_url: Url,
    api_key: String,
    access_token: Option<String>,
}

impl fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.access_token.is_some())
            .finish_non_exhaustive()
    }
}

impl RestBackend {
    /// Builds a client from the loaded configuration.
    ///
    /// # Errors
    /// Fails when the backend URL is invalid or the HTTP client cannot be
    /// constructed.
    pub fn from_config(config: &ClientConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(config.realtime.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.backend_base_url()?,
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> BackendResult<Url> {
        Ok(self.base_url.join(REST_PREFIX)?.join(path)?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request.header("apikey", &self.api_key).bearer_auth(bearer)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), %body, "backend rejected request");
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                body: ErrorResponse::from_body(&body),
            });
        }
        Ok(response.json().await?)
    }
}

fn format_cursor(since: DateTime<Utc>) -> String {
    since.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl MessageRepository for RestBackend {
    #[instrument(name = "rest.find_conversation", skip(self), err)]
    async fn find_conversation(&self, conversation_id: Uuid) -> BackendResult<Option<Conversation>> {
        let mut url = self.endpoint("chats")?;
        url.query_pairs_mut()
            .append_pair("select", "id,listing_id,status,buyer_id,seller_id")
            .append_pair("id", &format!("eq.{conversation_id}"));

        let response = self.authorize(self.client.get(url)).send().await?;
        let rows: Vec<Conversation> = Self::read_json(response).await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(name = "rest.list_conversations", skip(self), err)]
    async fn list_conversations(&self, user_id: Uuid) -> BackendResult<Vec<ConversationSummary>> {
        // The RPC scopes rows to the authenticated user.
        let url = self.endpoint("rpc/get_my_chats")?;
        let response = self
            .authorize(self.client.post(url))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::read_json(response).await
    }

    #[instrument(name = "rest.query_messages", skip(self))]
    async fn query_messages(
        &self,
        conversation_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> BackendResult<Vec<Message>> {
        let mut url = self.endpoint("messages")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("select", "*")
                .append_pair("chat_id", &format!("eq.{conversation_id}"))
                .append_pair("order", "created_at.asc");
            if let Some(since) = since {
                query.append_pair("created_at", &format!("gt.{}", format_cursor(since)));
            }
        }

        let response = self.authorize(self.client.get(url)).send().await?;
        Self::read_json(response).await
    }

    #[instrument(
        name = "rest.insert_message",
        skip(self, message),
        fields(conversation_id = %message.conversation_id),
        err
    )]
    async fn insert_message(&self, message: &NewMessage) -> BackendResult<Message> {
        let url = self.endpoint("messages")?;
        let response = self
            .authorize(self.client.post(url))
            .header("Prefer", "return=representation")
            .json(message)
            .send()
            .await?;
        let rows: Vec<Message> = Self::read_json(response).await?;
        rows.into_iter().next().ok_or(BackendError::EmptyResult)
    }
}
