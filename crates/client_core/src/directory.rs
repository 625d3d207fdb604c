use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{GroupId, Username},
    error::ApiException,
    protocol::{AddMembersRequest, CreateGroupRequest, GroupMember, GroupSummary, HistoryMessage},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{error::FetchError, session::SessionProvider, types::ChannelKey};

/// History and group directory exposed by the chat server over REST.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn history(&self, key: &ChannelKey) -> Result<Vec<HistoryMessage>, FetchError>;
    async fn groups(&self) -> Result<Vec<GroupSummary>, FetchError>;
    async fn group_members(&self, group_id: GroupId) -> Result<Vec<GroupMember>, FetchError>;
    async fn create_group(&self, request: &CreateGroupRequest) -> Result<GroupSummary, FetchError>;
    async fn add_members(&self, group_id: GroupId, members: &[Username]) -> Result<(), FetchError>;
    async fn leave_group(&self, group_id: GroupId) -> Result<(), FetchError>;
}

pub struct HttpDirectory {
    http: Client,
    api_base: Url,
    session: Arc<dyn SessionProvider>,
}

impl HttpDirectory {
    pub fn new(api_base: Url, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            http: Client::new(),
            api_base,
            session,
        }
    }

    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Transport(format!("invalid api base url: {}", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends the request with the current bearer token. A `401` triggers one
    /// refresh and one retry; a failed refresh or a second `401` invalidates the
    /// session.
    async fn execute<F>(&self, build: F) -> Result<Response, FetchError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let token = self
            .session
            .bearer_token()
            .await
            .map_err(|err| FetchError::Unauthorized(err.to_string()))?;
        let response = build(&self.http).bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        info!("directory: credential rejected; refreshing session");
        let token = match self.session.refresh().await {
            Ok(token) => token,
            Err(err) => {
                warn!("directory: session refresh failed: {err}");
                self.session.invalidate();
                return Err(FetchError::Unauthorized(err.to_string()));
            }
        };
        let response = build(&self.http).bearer_auth(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("directory: refreshed credential rejected; invalidating session");
            self.session.invalidate();
        }
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        debug!(%url, "directory: GET");
        self.execute(|http| http.get(url.clone()))
            .await?
            .json()
            .await
            .map_err(|err| FetchError::Decode(err.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiException::from_body(status.as_u16(), &body).into())
}

#[async_trait]
impl DirectoryService for HttpDirectory {
    async fn history(&self, key: &ChannelKey) -> Result<Vec<HistoryMessage>, FetchError> {
        let url = match key {
            ChannelKey::Public => self.endpoint(&["messages"])?,
            ChannelKey::Private(peer) => self.endpoint(&["messages", "private", peer.as_str()])?,
            ChannelKey::Group(group_id) => {
                let group_id = group_id.to_string();
                self.endpoint(&["groups", group_id.as_str(), "messages"])?
            }
        };
        self.get_json(url).await
    }

    async fn groups(&self) -> Result<Vec<GroupSummary>, FetchError> {
        let url = self.endpoint(&["groups"])?;
        self.get_json(url).await
    }

    async fn group_members(&self, group_id: GroupId) -> Result<Vec<GroupMember>, FetchError> {
        let group_id = group_id.to_string();
        let url = self.endpoint(&["groups", group_id.as_str(), "members"])?;
        self.get_json(url).await
    }

    async fn create_group(&self, request: &CreateGroupRequest) -> Result<GroupSummary, FetchError> {
        let url = self.endpoint(&["groups"])?;
        debug!(%url, name = %request.name, "directory: POST create group");
        self.execute(|http| http.post(url.clone()).json(request))
            .await?
            .json()
            .await
            .map_err(|err| FetchError::Decode(err.to_string()))
    }

    async fn add_members(&self, group_id: GroupId, members: &[Username]) -> Result<(), FetchError> {
        let group_id = group_id.to_string();
        let url = self.endpoint(&["groups", group_id.as_str(), "addmembers"])?;
        let body = AddMembersRequest {
            members: members.to_vec(),
        };
        debug!(%url, members = members.len(), "directory: POST add members");
        self.execute(|http| http.post(url.clone()).json(&body)).await?;
        Ok(())
    }

    async fn leave_group(&self, group_id: GroupId) -> Result<(), FetchError> {
        let group_id = group_id.to_string();
        let url = self.endpoint(&["groups", group_id.as_str(), "leave"])?;
        debug!(%url, "directory: DELETE leave group");
        self.execute(|http| http.delete(url.clone())).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/directory_tests.rs"]
mod tests;
