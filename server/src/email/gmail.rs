extern crate google_gmail1 as gmail1;

use async_trait::async_trait;
use gmail1::api::{ListMessagesResponse, Message};
use reqwest::StatusCode;
use thiserror::Error;

use crate::{server_config::cfg, HttpClient};

use super::message::MailContent;

#[derive(Debug, Error)]
pub enum GmailError {
    #[error("Gmail rejected the access token")]
    Unauthorized,
    #[error("Gmail request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Gmail API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Could not read message {id}: {reason}")]
    Parse { id: String, reason: String },
}

/// Read access to one user's mailbox.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Up to `max_results` message ids, newest first.
    async fn list_message_ids(
        &self,
        query: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<String>, GmailError>;

    async fn get_message(&self, id: &str) -> Result<MailContent, GmailError>;
}

pub struct GmailClient {
    http_client: HttpClient,
    access_token: String,
    endpoint: String,
    page_size: usize,
}

impl GmailClient {
    pub fn new(http_client: HttpClient, access_token: impl Into<String>) -> Self {
        Self {
            http_client,
            access_token: access_token.into(),
            endpoint: cfg.gmail.endpoint.clone(),
            page_size: cfg.gmail.page_size,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>, page_size: usize) -> Self {
        self.endpoint = endpoint.into();
        self.page_size = page_size.max(1);
        self
    }

    fn url(&self, path: &[&str]) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), path.join("/"))
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GmailError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(GmailError::Unauthorized);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(GmailError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    async fn get_message_list(
        &self,
        query: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse, GmailError> {
        let mut params = vec![("maxResults", max_results.to_string())];
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            params.push(("q", q.to_string()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let resp = self
            .http_client
            .get(self.url(&["messages"]))
            .query(&params)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        Ok(Self::check(resp).await?.json::<ListMessagesResponse>().await?)
    }
}

#[async_trait]
impl Mailbox for GmailClient {
    async fn list_message_ids(
        &self,
        query: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<String>, GmailError> {
        let mut ids = Vec::with_capacity(max_results);
        let mut page_token: Option<String> = None;

        while ids.len() < max_results {
            let remaining = max_results - ids.len();
            let page = self
                .get_message_list(query, remaining.min(self.page_size), page_token.as_deref())
                .await?;

            ids.extend(
                page.messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id)
                    .take(remaining),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!("Listed {} message ids", ids.len());
        Ok(ids)
    }

    async fn get_message(&self, id: &str) -> Result<MailContent, GmailError> {
        let resp = self
            .http_client
            .get(self.url(&["messages", id]))
            .bearer_auth(&self.access_token)
            .query(&[("format", "RAW")])
            .send()
            .await?;

        let msg = Self::check(resp).await?.json::<Message>().await?;
        MailContent::from_gmail_message(msg).map_err(|e| GmailError::Parse {
            id: id.to_string(),
            reason: format!("{e:#}"),
        })
    }
}
