//! Wire types for the accounts service: the JWT claims issued by the auth
//! collaborator, request bodies, query parameters and response views.

use chrono::{DateTime, NaiveDate, Utc};
use models::{NoteKind, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_AVATAR: &str = "/static/images/default-profile.jpg";
pub const DEFAULT_CERTIFICATE: &str = "/static/images/default_certificate.png";

/// Payload of the bearer token minted by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub sub: i64, // user id
    pub tenant_id: i64,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

/// One submitted custom-field entry: `[name, value]`, the value being
/// whatever JSON shape the field kind expects (string, list or boolean).
pub type FieldEntry = (String, serde_json::Value);

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub middle_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub speciality: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub examination: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub custom_fields: Vec<FieldEntry>,
    #[serde(default)]
    pub groups: Vec<i64>,
    #[serde(default)]
    pub tags: Vec<i64>,
}

/// Partial profile update; absent fields keep their stored value. An email
/// change here triggers the custom-field rename cascade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub role: Option<Role>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<String>,
    pub city: Option<String>,
    pub position: Option<String>,
    pub grade: Option<String>,
    pub gender: Option<String>,
    pub speciality: Option<String>,
    pub examination: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub about: Option<String>,
    pub is_approved: Option<bool>,
    pub groups: Option<Vec<i64>>,
    pub tags: Option<Vec<i64>>,
    /// `[name, value]` pairs; an empty value clears the stored entry.
    pub custom_fields: Option<Vec<FieldEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListParams {
    pub role: Option<String>,
    /// JSON object `{"role": [..]}`; ignored when unparsable.
    pub filter: Option<String>,
    /// Zero-based page; ignored when unparsable.
    pub page: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupListParams {
    pub course: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteListParams {
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiplomaListParams {
    pub my: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivateParams {
    pub code: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordChangeRequest {
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchIdsRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SalesParams {
    pub date_start: String,
    pub date_end: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportParams {
    /// Comma-separated user ids; unparsable entries are skipped.
    pub users: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupWriteRequest {
    pub title: String,
    #[serde(default)]
    pub course_id: Option<i64>,
    #[serde(default = "default_limit_access")]
    pub limit_access: u16,
    #[serde(default)]
    pub date_start: Option<NaiveDate>,
    #[serde(default)]
    pub date_end: Option<NaiveDate>,
    #[serde(default = "default_duration")]
    pub duration: u16,
    #[serde(default)]
    pub users: Vec<i64>,
}

fn default_limit_access() -> u16 {
    10
}

fn default_duration() -> u16 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteWriteRequest {
    pub user_id: i64,
    pub kind: NoteKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiplomaWriteRequest {
    pub user_id: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Positional import row as handed over by the spreadsheet collaborator:
/// `[first_name, middle_name, last_name, email, phone]`.
pub type RawRow = Vec<Option<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub created: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub error: String,
    pub counts: ImportCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleView {
    pub value: String,
    pub title: String,
}

impl From<Role> for RoleView {
    fn from(role: Role) -> Self {
        Self {
            value: role.as_str().to_owned(),
            title: role.title().to_owned(),
        }
    }
}

/// Compact reference to a related row (group, tag).
#[derive(Debug, Clone, Serialize)]
pub struct RefView {
    pub id: i64,
    pub title: String,
}

/// A custom-field definition as presented to an edit form; dropdown choice
/// lists carry a leading empty sentinel so "unset" stays selectable.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSchemaView {
    pub name: String,
    pub kind: models::FieldKind,
    pub required: bool,
    pub visible: bool,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldValueView {
    pub name: String,
    pub value: Option<String>,
    pub visible: bool,
    pub kind: models::FieldKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: String,
    pub full_name: String,
    pub short_name: String,
    pub avatar: String,
    pub role: RoleView,
    pub groups: Vec<RefView>,
    pub tags: Vec<RefView>,
    pub city: String,
    pub position: String,
    pub grade: String,
    pub gender: String,
    pub speciality: String,
    pub examination: String,
    pub phone: String,
    pub address: String,
    pub about: String,
    pub is_approved: bool,
    pub registered_at: DateTime<Utc>,
    pub custom_fields: Vec<FieldValueView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub id: i64,
    pub title: String,
    pub author_id: Option<i64>,
    pub course_id: Option<i64>,
    pub limit_access: u16,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub duration: u16,
    pub created_at: DateTime<Utc>,
    pub users: Vec<UserView>,
    pub is_active: bool,
    pub can_edit: bool,
    pub status: String,
    pub payment: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteView {
    pub id: i64,
    pub kind: NoteKind,
    pub title: Option<String>,
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user: Option<UserView>,
    pub author: Option<UserView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiplomaView {
    pub id: i64,
    pub description: String,
    pub image: String,
    pub user: Option<UserView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MyStudentResponse {
    pub result: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SalesRow {
    pub id: i64,
    pub full_name: String,
    pub courses: i64,
    pub webinars: i64,
}
