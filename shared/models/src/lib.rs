//! Domain entities shared between the accounts service and its siblings.
//!
//! Every row-like type here belongs to exactly one tenant (site); custom
//! field definitions belong to the organization owning the tenant, one level
//! up.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Isolation boundary. Every user, group, note and diploma hangs off exactly
/// one tenant; an organization may own several tenants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: i64,
    pub domain: String,
    pub organization_id: i64,
    /// Fixed UTC offset, minutes east. Custom date/datetime field input is
    /// normalized into this offset before storage.
    pub utc_offset_minutes: i32,
}

impl Tenant {
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
    }
}

/// Owner of tenants and of the custom profile-field schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub title: String,
    pub admin_id: Option<i64>,
    /// When set, the organization admin gets a copy of onboarding mail.
    pub notify_about_clients: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub organization_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Role::Student => "Ученик",
            Role::Teacher => "Преподаватель",
            Role::Admin => "Администратор",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

pub const GRADE_CHOICES: &[&str] = &[
    "Нет",
    "Кандидат психологических наук",
    "Доктор медицинских наук",
];

pub const SPECIALITY_CHOICES: &[&str] = &[
    "Психолог",
    "Клинический психолог",
    "Врач-психотерапевт",
    "Врач-психиатр",
];

pub const GENDER_CHOICES: &[&str] = &["Мужской", "Женский"];

pub const EXAMINATION_CHOICES: &[&str] = &["Не производилось", "Производилось"];

/// Account scoped to a tenant; (tenant, lowercased email) is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub tenant_id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: String,
    pub avatar: Option<String>,
    pub role: Role,
    pub groups: Vec<i64>,
    pub tags: Vec<i64>,
    pub city: String,
    pub position: String,
    pub grade: String,
    pub gender: String,
    pub speciality: String,
    pub examination: String,
    pub phone: String,
    pub address: String,
    pub about: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_paid: bool,
    pub is_approved: bool,
    pub registered_at: DateTime<Utc>,
    /// Opaque token, generated once at creation. Doubles as the
    /// activation-by-token key.
    pub unsubscribe_code: Uuid,
    pub is_unsubscribed: bool,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {} {}", self.last_name, self.first_name, self.middle_name)
    }

    pub fn short_name(&self) -> String {
        let initial = |s: &str| s.chars().next().map(|c| format!("{c}.")).unwrap_or_default();
        format!(
            "{} {}{}",
            self.last_name,
            initial(&self.first_name),
            initial(&self.middle_name)
        )
    }
}

/// Roster of users, optionally tied to a course offering, with an enrollment
/// window plus an access duration in days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub tenant_id: i64,
    pub author_id: Option<i64>,
    pub title: String,
    pub course_id: Option<i64>,
    pub limit_access: u16,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub duration: u16,
    pub created_at: DateTime<Utc>,
    pub members: Vec<i64>,
}

impl Group {
    /// Derived lifecycle label: enrollment while today falls inside the
    /// window, completed once the window end plus the access duration has
    /// passed, otherwise active teaching.
    pub fn status(&self, today: NaiveDate) -> &'static str {
        match (self.date_start, self.date_end) {
            (Some(start), Some(end)) if self.duration > 0 => {
                if start <= today && today <= end {
                    "Набор"
                } else if end + Duration::days(i64::from(self.duration)) < today {
                    "Завершено"
                } else {
                    "Обучение"
                }
            }
            _ => "Обучение",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteKind {
    #[serde(rename = "Клинический диагноз")]
    Diagnosis,
    #[serde(rename = "Жалобы")]
    Complaints,
    #[serde(rename = "Текущее состояние")]
    CurrentState,
    #[serde(rename = "Заметки")]
    Notes,
}

/// Free-form record about a subject user; append-only in practice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub tenant_id: i64,
    pub author_id: Option<i64>,
    pub user_id: Option<i64>,
    pub kind: NoteKind,
    pub title: Option<String>,
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diploma {
    pub id: i64,
    pub tenant_id: i64,
    pub user_id: Option<i64>,
    pub description: String,
    pub image: Option<String>,
}

/// Closed set of custom-field shapes an organization may define.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Checkbox,
    Text,
    TextArea,
    Dropdown,
    MultiChoice,
    Date,
    DateTime,
}

/// Organization-defined profile field. The per-user values live out of band,
/// keyed by user email — keeping that key set consistent with the identity
/// rows is the lifecycle coordinator's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub visible: bool,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferingKind {
    Course,
    Webinar,
}

/// Course or webinar sold on the platform. Only the bits the accounts
/// service consumes: authorship gates note visibility and sales reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offering {
    pub id: i64,
    pub tenant_id: i64,
    pub title: String,
    pub kind: OfferingKind,
    pub authors: Vec<i64>,
}

/// Link from a user or group to an offering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: i64,
    pub tenant_id: i64,
    pub user_id: Option<i64>,
    pub group_id: Option<i64>,
    pub offering_id: Option<i64>,
    pub access: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub access_request_id: i64,
    pub amount: i64,
    pub is_paid: bool,
    pub paid_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 1,
            tenant_id: 1,
            email: "ivanov@example.com".into(),
            first_name: "Иван".into(),
            last_name: "Иванов".into(),
            middle_name: "Иванович".into(),
            avatar: None,
            role: Role::Student,
            groups: vec![],
            tags: vec![],
            city: String::new(),
            position: String::new(),
            grade: GRADE_CHOICES[0].into(),
            gender: GENDER_CHOICES[0].into(),
            speciality: SPECIALITY_CHOICES[0].into(),
            examination: EXAMINATION_CHOICES[0].into(),
            phone: String::new(),
            address: String::new(),
            about: String::new(),
            is_active: true,
            is_staff: false,
            is_paid: true,
            is_approved: false,
            registered_at: Utc::now(),
            unsubscribe_code: Uuid::new_v4(),
            is_unsubscribed: false,
        }
    }

    #[test]
    fn name_helpers() {
        let u = user();
        assert_eq!(u.full_name(), "Иванов Иван Иванович");
        assert_eq!(u.short_name(), "Иванов И.И.");
    }

    #[test]
    fn short_name_tolerates_missing_middle_name() {
        let mut u = user();
        u.middle_name.clear();
        assert_eq!(u.short_name(), "Иванов И.");
    }

    #[test]
    fn group_status_windows() {
        let group = Group {
            id: 1,
            tenant_id: 1,
            author_id: None,
            title: "Группа 1".into(),
            course_id: None,
            limit_access: 10,
            date_start: NaiveDate::from_ymd_opt(2024, 3, 1),
            date_end: NaiveDate::from_ymd_opt(2024, 3, 10),
            duration: 30,
            created_at: Utc::now(),
            members: vec![],
        };

        let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        assert_eq!(group.status(day(5)), "Набор");
        assert_eq!(group.status(day(20)), "Обучение");
        assert_eq!(
            group.status(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
            "Завершено"
        );
    }

    #[test]
    fn role_round_trip() {
        for role in [Role::Student, Role::Teacher, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("supervisor"), None);
    }
}
