//! Custom Field Registry: organization-defined profile fields and their
//! per-user values, keyed by user email.
//!
//! Reads and per-field edits go through here. The cascading key operations
//! (rename on email change, removal on purge) are composite store
//! operations and only the lifecycle coordinator invokes them — nothing
//! else may mutate the key set.

pub mod codec;

use dto::{FieldEntry, FieldValueView};
use models::{FieldDefinition, FieldKind, User};

use crate::store::{DirectoryStore, StoreResult};
use codec::{decode, encode, FieldError};

/// One pending value write: `None` clears the stored entry.
pub type FieldWrite = (i64, Option<String>);

pub struct FieldRegistry<'a> {
    store: &'a dyn DirectoryStore,
}

impl<'a> FieldRegistry<'a> {
    pub fn new(store: &'a dyn DirectoryStore) -> Self {
        Self { store }
    }

    pub async fn definitions(&self, org_id: i64) -> StoreResult<Vec<FieldDefinition>> {
        self.store.fields_for_organization(org_id).await
    }

    /// Rendered values for every definition of the user's organization, in
    /// definition order. Invisible fields are included with their flag; the
    /// caller decides what to show.
    pub async fn render_for_user(
        &self,
        org_id: i64,
        user: &User,
    ) -> StoreResult<Vec<FieldValueView>> {
        let mut views = Vec::new();
        for def in self.definitions(org_id).await? {
            let value = self.store.field_value(def.id, &user.email).await?;
            views.push(FieldValueView {
                name: def.name.clone(),
                value: value.map(|v| codec::present(&def, &v)),
                visible: def.visible,
                kind: def.kind,
            });
        }
        Ok(views)
    }

    /// Per-field edit path (admin profile edits). Last write wins at field
    /// granularity.
    pub async fn apply(&self, email: &str, writes: &[FieldWrite]) -> StoreResult<()> {
        for (field_id, value) in writes {
            self.store
                .set_field_value(*field_id, email, value.as_deref())
                .await?;
        }
        Ok(())
    }
}

/// Choice list for an edit widget. Dropdowns get a leading empty sentinel so
/// an unset selection stays representable; multi-choice lists do not.
pub fn edit_choices(def: &FieldDefinition) -> Vec<String> {
    let mut choices = def.choices.clone();
    if def.kind == FieldKind::Dropdown && !choices.is_empty() {
        choices.insert(0, String::new());
    }
    choices
}

/// Coerce submitted `[name, value]` entries against the organization's
/// definitions. Every required definition must resolve to a set value —
/// whether it was submitted empty or not submitted at all.
pub fn coerce_entries(
    defs: &[FieldDefinition],
    entries: &[FieldEntry],
    tz: chrono::FixedOffset,
) -> Result<Vec<FieldWrite>, FieldError> {
    let mut writes: Vec<FieldWrite> = Vec::with_capacity(entries.len());
    for (name, raw) in entries {
        let def = defs
            .iter()
            .find(|d| d.name == *name)
            .ok_or_else(|| FieldError::Unknown(name.clone()))?;
        let write = decode(def, raw, tz)?.map(|value| encode(&value));
        writes.push((def.id, write));
    }
    for def in defs.iter().filter(|d| d.required) {
        let set = writes
            .iter()
            .any(|(id, value)| *id == def.id && value.is_some());
        if !set {
            return Err(FieldError::Required(def.name.clone()));
        }
    }
    Ok(writes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dropdown(name: &str, required: bool) -> FieldDefinition {
        FieldDefinition {
            id: 7,
            organization_id: 1,
            name: name.into(),
            kind: FieldKind::Dropdown,
            required,
            visible: true,
            choices: vec!["Yes".into(), "No".into()],
        }
    }

    fn msk() -> chrono::FixedOffset {
        chrono::FixedOffset::east_opt(3 * 3600).unwrap()
    }

    #[test]
    fn dropdown_edit_choices_get_empty_sentinel() {
        let def = dropdown("Licensed", false);
        assert_eq!(edit_choices(&def), vec!["", "Yes", "No"]);

        let multi = FieldDefinition {
            kind: FieldKind::MultiChoice,
            ..dropdown("Licensed", false)
        };
        assert_eq!(edit_choices(&multi), vec!["Yes", "No"]);
    }

    #[test]
    fn missing_required_entry_is_rejected() {
        let defs = vec![dropdown("Licensed", true)];
        let err = coerce_entries(&defs, &[], msk()).unwrap_err();
        assert_eq!(err, FieldError::Required("Licensed".into()));
    }

    #[test]
    fn submitted_required_entry_is_encoded() {
        let defs = vec![dropdown("Licensed", true)];
        let entries = vec![("Licensed".to_string(), json!("Yes"))];
        let writes = coerce_entries(&defs, &entries, msk()).unwrap();
        assert_eq!(writes, vec![(7, Some("Yes".to_string()))]);
    }

    #[test]
    fn unknown_field_name_is_rejected() {
        let defs = vec![dropdown("Licensed", false)];
        let entries = vec![("Badge".to_string(), json!("x"))];
        let err = coerce_entries(&defs, &entries, msk()).unwrap_err();
        assert_eq!(err, FieldError::Unknown("Badge".into()));
    }

    #[test]
    fn optional_empty_entry_becomes_a_clear() {
        let defs = vec![dropdown("Licensed", false)];
        let entries = vec![("Licensed".to_string(), json!(""))];
        let writes = coerce_entries(&defs, &entries, msk()).unwrap();
        assert_eq!(writes, vec![(7, None)]);
    }
}
