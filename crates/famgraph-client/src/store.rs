//! Backend store contract and wire types.
//!
//! [`PersonStore`] is the REST surface the engine consumes. [`HttpStore`]
//! (in `http.rs`) implements it over reqwest; tests implement it in memory.
//!
//! Futures are `?Send`: the engine runs on one logical thread and network
//! calls are its only suspension points.
//!
//! [`HttpStore`]: crate::HttpStore

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use famgraph_types::{FamilyTreeId, Gender, Person, PersonDate, PersonId, UserId};

use crate::mutation::IdMapping;

/// Transport-level failure talking to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend rejected credentials")]
    Unauthorized,
    #[error("network failure: {0}")]
    Network(String),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl StoreError {
    /// The backend's own message where there is one, else the error text.
    pub fn message(&self) -> String {
        match self {
            StoreError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// Body of `POST /api/Persons/Update`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateRequest {
    pub family_tree_id: FamilyTreeId,
    pub add_nodes_data: Vec<Person>,
    pub update_nodes_data: Vec<Person>,
}

/// Form input for a new person.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersonDraft {
    pub name: String,
    pub gender: Gender,
    pub birth_date: Option<PersonDate>,
    pub death_date: Option<PersonDate>,
    pub fid: Option<PersonId>,
    pub mid: Option<PersonId>,
}

/// Body of `POST /api/Persons`. This endpoint wants PascalCase keys.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreatePersonRequest {
    pub name: String,
    pub gender: Gender,
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
    pub fid: Option<PersonId>,
    pub mid: Option<PersonId>,
    pub family_tree_id: FamilyTreeId,
}

impl CreatePersonRequest {
    pub fn new(draft: &PersonDraft, family_tree_id: &FamilyTreeId) -> Self {
        Self {
            name: draft.name.trim().to_string(),
            gender: draft.gender,
            birth_date: draft.birth_date.as_ref().map(ToString::to_string),
            death_date: draft.death_date.as_ref().map(ToString::to_string),
            fid: draft.fid.clone(),
            mid: draft.mid.clone(),
            family_tree_id: family_tree_id.clone(),
        }
    }
}

/// Response of `POST /api/Persons`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CreatePersonResponse {
    #[serde(alias = "Success")]
    pub success: bool,
    #[serde(alias = "Message")]
    pub message: Option<String>,
    #[serde(alias = "Id", alias = "personId")]
    pub id: serde_json::Value,
}

impl CreatePersonResponse {
    pub fn person_id(&self) -> Option<PersonId> {
        PersonId::from_wire(&self.id)
    }
}

/// Body of `PUT /api/Persons/{id}`: camelCase, integer keys where possible.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePersonRequest {
    pub name: String,
    pub gender: Option<Gender>,
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
    pub fid: serde_json::Value,
    pub mid: serde_json::Value,
    pub family_tree_id: serde_json::Value,
}

impl UpdatePersonRequest {
    pub fn new(person: &Person, family_tree_id: &FamilyTreeId) -> Self {
        let id_or_null = |id: &Option<PersonId>| {
            id.as_ref().map(PersonId::to_wire).unwrap_or(serde_json::Value::Null)
        };
        Self {
            name: person.name.clone(),
            gender: person.gender,
            birth_date: person.birth_date.as_ref().map(ToString::to_string),
            death_date: person.death_date.as_ref().map(ToString::to_string),
            fid: id_or_null(&person.fid),
            mid: id_or_null(&person.mid),
            family_tree_id: family_tree_id.to_wire(),
        }
    }
}

/// Body of `POST /api/Persons/{id}/AddPartner/{partnerId}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPartnerRequest {
    pub partner_id: serde_json::Value,
    pub family_tree_id: serde_json::Value,
}

impl AddPartnerRequest {
    pub fn new(partner: &PersonId, family_tree_id: &FamilyTreeId) -> Self {
        Self {
            partner_id: partner.to_wire(),
            family_tree_id: family_tree_id.to_wire(),
        }
    }
}

/// One entry of `GET /api/FamilyUsers/user/{userId}/familytrees`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyTreeSummary {
    #[serde(alias = "Id")]
    pub id: FamilyTreeId,
    #[serde(default, alias = "LastName")]
    pub last_name: Option<String>,
    #[serde(default, alias = "Description")]
    pub description: Option<String>,
}

impl FamilyTreeSummary {
    pub fn display_name(&self) -> &str {
        self.last_name.as_deref().filter(|s| !s.is_empty()).unwrap_or("Unknown")
    }
}

/// One entry of `GET /api/FamilyUsers/familytree/{familyTreeId}/users`.
///
/// The backend has sent both casings for these keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FamilyTreeMember {
    #[serde(alias = "Id", alias = "userId", alias = "UserId")]
    pub id: Option<UserId>,
    #[serde(alias = "FirstName")]
    pub first_name: Option<String>,
    #[serde(alias = "LastName")]
    pub last_name: Option<String>,
    #[serde(alias = "Profession")]
    pub profession: Option<String>,
    #[serde(alias = "ProfileUrl")]
    pub profile_url: Option<String>,
}

impl FamilyTreeMember {
    /// `first last`, skipping blank parts.
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [&self.first_name, &self.last_name]
            .into_iter()
            .filter_map(|p| p.as_deref().map(str::trim))
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() { "Unknown".to_string() } else { parts.join(" ") }
    }
}

/// Body of `POST /api/FamilyTrees`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFamilyTree {
    pub last_name: String,
    pub description: String,
}

// ============================================================================
// Store trait
// ============================================================================

/// The backend's person and family tree endpoints.
///
/// Every call carries the bearer token explicitly; the store holds no
/// session state.
#[async_trait(?Send)]
pub trait PersonStore {
    /// `GET /api/Persons/familytree/{familyTreeId}`. Raw records, untransformed.
    async fn list_persons(
        &self,
        token: &str,
        family_tree_id: &FamilyTreeId,
    ) -> Result<Vec<serde_json::Value>, StoreError>;

    /// `GET /api/Persons/{id}`.
    async fn get_person(&self, token: &str, id: &PersonId)
    -> Result<serde_json::Value, StoreError>;

    /// `POST /api/Persons`.
    async fn create_person(
        &self,
        token: &str,
        request: &CreatePersonRequest,
    ) -> Result<CreatePersonResponse, StoreError>;

    /// `POST /api/Persons/Update`. Returns temporary → permanent ids.
    async fn update_batch(
        &self,
        token: &str,
        request: &BatchUpdateRequest,
    ) -> Result<IdMapping, StoreError>;

    /// `PUT /api/Persons/{id}`.
    async fn update_person(
        &self,
        token: &str,
        id: &PersonId,
        request: &UpdatePersonRequest,
    ) -> Result<(), StoreError>;

    /// `DELETE /api/Persons/{id}`.
    async fn delete_person(&self, token: &str, id: &PersonId) -> Result<(), StoreError>;

    /// `POST /api/Persons/{id}/AddPartner/{partnerId}`.
    async fn add_partner(
        &self,
        token: &str,
        id: &PersonId,
        request: &AddPartnerRequest,
    ) -> Result<(), StoreError>;

    /// `GET /api/FamilyUsers/user/{userId}/familytrees`.
    async fn list_family_trees(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<Vec<FamilyTreeSummary>, StoreError>;

    /// `POST /api/FamilyTrees`.
    async fn create_family_tree(
        &self,
        token: &str,
        request: &NewFamilyTree,
    ) -> Result<(), StoreError>;

    /// `GET /api/FamilyUsers/familytree/{familyTreeId}/users`.
    async fn list_family_tree_users(
        &self,
        token: &str,
        family_tree_id: &FamilyTreeId,
    ) -> Result<Vec<FamilyTreeMember>, StoreError>;
}

// ============================================================================
// Tests
// ============================================================================
