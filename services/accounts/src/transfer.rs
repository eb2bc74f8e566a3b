//! Spreadsheet collaborator boundary. File parsing and formatting live in
//! the import/export service; this module only defines what a row means.

use dto::RawRow;
use models::User;

pub const EXPORT_HEADER: [&str; 4] = ["ФИО", "Роль", "Дата регистрации", "Email"];

/// Validated import row. Columns are positional:
/// first name, middle name, last name, email, phone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRow {
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// `None` when a mandatory column (first name, last name, email) is blank.
pub fn parse_row(row: &RawRow) -> Option<ParsedRow> {
    let cell = |i: usize| {
        row.get(i)
            .and_then(|c| c.clone())
            .unwrap_or_default()
            .trim()
            .to_owned()
    };
    let first_name = cell(0);
    let last_name = cell(2);
    let email = cell(3);
    if first_name.is_empty() || last_name.is_empty() || email.is_empty() {
        return None;
    }
    Some(ParsedRow {
        first_name,
        middle_name: cell(1),
        last_name,
        email,
        phone: cell(4),
    })
}

pub fn export_row(user: &User) -> [String; 4] {
    [
        user.full_name(),
        user.role.title().to_owned(),
        user.registered_at.format("%d.%m.%Y").to_string(),
        user.email.clone(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> RawRow {
        cells.iter().map(|c| Some(c.to_string())).collect()
    }

    #[test]
    fn parses_full_row() {
        let parsed = parse_row(&row(&["Иван", "Иванович", "Иванов", "i@sdo.ru", "+7 900"]));
        assert_eq!(
            parsed,
            Some(ParsedRow {
                first_name: "Иван".into(),
                middle_name: "Иванович".into(),
                last_name: "Иванов".into(),
                email: "i@sdo.ru".into(),
                phone: "+7 900".into(),
            })
        );
    }

    #[test]
    fn missing_mandatory_column_rejects_row() {
        assert_eq!(parse_row(&row(&["Иван", "", "Иванов", "", ""])), None);
        assert_eq!(parse_row(&row(&["", "", "Иванов", "i@sdo.ru"])), None);
        assert_eq!(parse_row(&vec![None, None, None, None, None]), None);
    }

    #[test]
    fn short_rows_tolerated() {
        let parsed = parse_row(&row(&["Иван", "", "Иванов", "i@sdo.ru"])).unwrap();
        assert_eq!(parsed.phone, "");
    }
}
