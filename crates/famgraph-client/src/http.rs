//! reqwest implementation of [`PersonStore`].

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use famgraph_types::{FamilyTreeId, PersonId};

use crate::config::{ClientConfig, ConfigError};
use crate::constants::MAX_ERROR_BODY_CHARS;
use crate::mutation::IdMapping;
use crate::store::{
    AddPartnerRequest, BatchUpdateRequest, CreatePersonRequest, CreatePersonResponse,
    FamilyTreeMember, FamilyTreeSummary, NewFamilyTree, PersonStore, StoreError,
    UpdatePersonRequest,
};

/// Backend store over HTTP with bearer authentication.
pub struct HttpStore {
    http: Client,
    origin: Url,
}

impl HttpStore {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let origin = Url::parse(&config.backend_origin)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| ConfigError::InvalidOrigin(config.backend_origin.clone()))?;

        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self { http, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// `origin` + `/api/` + segments, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.origin.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Network(format!("unusable origin {}", self.origin)))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, token: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(token)
            .header("Accept", "application/json")
    }

    /// Send and return the body text of a successful response.
    async fn send(&self, request: RequestBuilder) -> Result<String, StoreError> {
        let request = request.build().map_err(|e| StoreError::Network(e.to_string()))?;
        let method = request.method().clone();
        let path = request.url().path().to_string();
        trace!(%method, %path, "backend request");

        let response = self.http.execute(request).await.map_err(|e| {
            warn!(%method, %path, "backend unreachable: {}", e);
            StoreError::Network(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        if !status.is_success() {
            let error = status_error(status, &path, &body);
            warn!(%method, %path, status = status.as_u16(), "backend error: {}", error);
            return Err(error);
        }
        debug!(%method, %path, status = status.as_u16(), bytes = body.len(), "backend response");
        Ok(body)
    }
}

/// Map a non-success status to a [`StoreError`].
fn status_error(status: StatusCode, path: &str, body: &str) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(path.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized,
        other => StoreError::Status {
            status: other.as_u16(),
            message: error_message(body),
        },
    }
}

/// The backend's `message` when the body is JSON, else the (truncated) body.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let message = ["message", "Message", "title"]
            .iter()
            .find_map(|k| value.get(*k).and_then(|m| m.as_str()));
        if let Some(message) = message {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Parse a JSON body; an empty body reads as `null`.
fn decode<T: DeserializeOwned>(body: &str) -> Result<T, StoreError> {
    let text = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(text).map_err(|e| StoreError::Decode(e.to_string()))
}

#[async_trait(?Send)]
impl PersonStore for HttpStore {
    async fn list_persons(
        &self,
        token: &str,
        family_tree_id: &FamilyTreeId,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let url = self.url(&["Persons", "familytree", family_tree_id.as_str()])?;
        let body = self.send(self.request(Method::GET, url, token)).await?;
        let records: Option<Vec<serde_json::Value>> = decode(&body)?;
        Ok(records.unwrap_or_default())
    }

    async fn get_person(
        &self,
        token: &str,
        id: &PersonId,
    ) -> Result<serde_json::Value, StoreError> {
        let url = self.url(&["Persons", id.as_str()])?;
        let body = self.send(self.request(Method::GET, url, token)).await?;
        decode(&body)
    }

    async fn create_person(
        &self,
        token: &str,
        request: &CreatePersonRequest,
    ) -> Result<CreatePersonResponse, StoreError> {
        let url = self.url(&["Persons"])?;
        let body = self
            .send(self.request(Method::POST, url, token).json(request))
            .await?;
        let response: Option<CreatePersonResponse> = decode(&body)?;
        Ok(response.unwrap_or_default())
    }

    async fn update_batch(
        &self,
        token: &str,
        request: &BatchUpdateRequest,
    ) -> Result<IdMapping, StoreError> {
        let url = self.url(&["Persons", "Update"])?;
        let body = self
            .send(self.request(Method::POST, url, token).json(request))
            .await?;
        let value: serde_json::Value = decode(&body)?;
        IdMapping::from_wire(&value)
    }

    async fn update_person(
        &self,
        token: &str,
        id: &PersonId,
        request: &UpdatePersonRequest,
    ) -> Result<(), StoreError> {
        let url = self.url(&["Persons", id.as_str()])?;
        self.send(self.request(Method::PUT, url, token).json(request))
            .await?;
        Ok(())
    }

    async fn delete_person(&self, token: &str, id: &PersonId) -> Result<(), StoreError> {
        let url = self.url(&["Persons", id.as_str()])?;
        self.send(self.request(Method::DELETE, url, token)).await?;
        Ok(())
    }

    async fn add_partner(
        &self,
        token: &str,
        id: &PersonId,
        request: &AddPartnerRequest,
    ) -> Result<(), StoreError> {
        let partner = match &request.partner_id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let url = self.url(&["Persons", id.as_str(), "AddPartner", &partner])?;
        self.send(self.request(Method::POST, url, token).json(request))
            .await?;
        Ok(())
    }

    async fn list_family_trees(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<Vec<FamilyTreeSummary>, StoreError> {
        let url = self.url(&["FamilyUsers", "user", user_id, "familytrees"])?;
        let body = self.send(self.request(Method::GET, url, token)).await?;
        let trees: Option<Vec<FamilyTreeSummary>> = decode(&body)?;
        Ok(trees.unwrap_or_default())
    }

    async fn create_family_tree(
        &self,
        token: &str,
        request: &NewFamilyTree,
    ) -> Result<(), StoreError> {
        let url = self.url(&["FamilyTrees"])?;
        self.send(self.request(Method::POST, url, token).json(request))
            .await?;
        Ok(())
    }

    async fn list_family_tree_users(
        &self,
        token: &str,
        family_tree_id: &FamilyTreeId,
    ) -> Result<Vec<FamilyTreeMember>, StoreError> {
        let url = self.url(&["FamilyUsers", "familytree", family_tree_id.as_str(), "users"])?;
        let body = self.send(self.request(Method::GET, url, token)).await?;
        let members: Option<Vec<FamilyTreeMember>> = decode(&body)?;
        Ok(members.unwrap_or_default())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store(origin: &str) -> HttpStore {
        let config = ClientConfig { backend_origin: origin.to_string(), ..Default::default() };
        HttpStore::new(&config).unwrap()
    }

    #[test]
    fn test_url_joins_segments_under_api() {
        let store = store("http://localhost:5000");
        let url = store.url(&["Persons", "familytree", "7"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/Persons/familytree/7");
    }

    #[test]
    fn test_members_url() {
        let store = store("http://localhost:5000/");
        let url = store.url(&["FamilyUsers", "familytree", "7", "users"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/FamilyUsers/familytree/7/users");
    }

    #[test]
    fn test_url_keeps_origin_path_prefix_and_encodes() {
        let store = store("https://family.example.org/backend");
        let url = store.url(&["Persons", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "https://family.example.org/backend/api/Persons/a%20b%2Fc");
    }

    #[test]
    fn test_rejects_unusable_origin() {
        let config = ClientConfig { backend_origin: "mailto:x@y".into(), ..Default::default() };
        assert!(matches!(HttpStore::new(&config), Err(ConfigError::InvalidOrigin(_))));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "/api/Persons/9", ""),
            StoreError::NotFound("/api/Persons/9".into())
        );
        assert_eq!(status_error(StatusCode::FORBIDDEN, "/", ""), StoreError::Unauthorized);
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, "/", r#"{"message":"Fid is invalid"}"#),
            StoreError::Status { status: 400, message: "Fid is invalid".into() }
        );
    }

    #[test]
    fn test_error_message_truncates_plain_bodies() {
        let long = "x".repeat(500);
        assert_eq!(error_message(&long).chars().count(), MAX_ERROR_BODY_CHARS);
        assert_eq!(error_message("  oops \n"), "oops");
        assert_eq!(error_message(""), "no response body");
        assert_eq!(error_message(r#"{"Message":"nope"}"#), "nope");
    }

    #[test]
    fn test_decode_empty_body_is_null() {
        let value: serde_json::Value = decode("").unwrap();
        assert!(value.is_null());
        assert!(matches!(decode::<Vec<u8>>("{"), Err(StoreError::Decode(_))));
    }
}
