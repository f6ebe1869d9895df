use serde::{Deserialize, Deserializer, Serialize};

/// A channel participant as returned by a directory search.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Member {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub premium: bool,
    /// Where the provider serves the profile photo, if the member has one.
    #[serde(default)]
    pub photo_url: Option<String>,
}

/// One row of the record table. `user_id` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(deserialize_with = "loose_id")]
    pub user_id: i64,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub is_bot: bool,
    #[serde(default, deserialize_with = "loose_bool")]
    pub is_premium: bool,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub photo: Option<String>,
}

impl Record {
    pub fn from_member(member: &Member, photo: Option<String>) -> Self {
        Record {
            user_id: member.id,
            username: member.username.clone(),
            first_name: member.first_name.clone(),
            last_name: member.last_name.clone(),
            full_name: full_name(member.first_name.as_deref(), member.last_name.as_deref()),
            phone: member.phone.clone(),
            is_bot: member.bot,
            is_premium: member.premium,
            photo,
        }
    }

    /// Column names of the record table, in field order.
    pub const COLUMNS: [&'static str; 9] = [
        "user_id", "username", "first_name", "last_name", "full_name",
        "phone", "is_bot", "is_premium", "photo",
    ];

    /// Cell values in [`Record::COLUMNS`] order, as the CSV serializer writes them.
    pub fn fields(&self) -> [String; 9] {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        [
            self.user_id.to_string(),
            opt(&self.username),
            opt(&self.first_name),
            opt(&self.last_name),
            self.full_name.clone(),
            opt(&self.phone),
            self.is_bot.to_string(),
            self.is_premium.to_string(),
            opt(&self.photo),
        ]
    }
}

/// Parses an identifier cell. Spreadsheet round trips turn `100` into `100.0`.
pub fn parse_user_id(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Some(id);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15)
        .map(|f| f as i64)
}

pub fn full_name(first: Option<&str>, last: Option<&str>) -> String {
    format!("{} {}", first.unwrap_or(""), last.unwrap_or("")).trim().to_string()
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty() && s != "nan"))
}

fn loose_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_user_id(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid user_id '{}'", raw)))
}

// Tables written by spreadsheet tools or pandas spell booleans as True/False.
fn loose_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "nan" => Ok(false),
            other => Err(serde::de::Error::custom(format!("invalid boolean '{}'", other))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: i64, first: Option<&str>, last: Option<&str>) -> Member {
        Member {
            id,
            username: Some("handle".to_string()),
            first_name: first.map(String::from),
            last_name: last.map(String::from),
            phone: None,
            bot: false,
            premium: true,
            photo_url: None,
        }
    }

    #[test]
    fn test_full_name_trims_missing_parts() {
        assert_eq!(full_name(Some("Иван"), Some("Петров")), "Иван Петров");
        assert_eq!(full_name(Some("Ivan"), None), "Ivan");
        assert_eq!(full_name(None, Some("Petrov")), "Petrov");
        assert_eq!(full_name(None, None), "");
    }

    #[test]
    fn test_record_from_member() {
        let record = Record::from_member(&member(7, Some("Anna"), None), Some("photos/7.jpg".to_string()));
        assert_eq!(record.user_id, 7);
        assert_eq!(record.full_name, "Anna");
        assert!(record.is_premium);
        assert!(!record.is_bot);
        assert_eq!(record.photo.as_deref(), Some("photos/7.jpg"));
    }

    #[test]
    fn test_parse_user_id_accepts_float_cells() {
        assert_eq!(parse_user_id("42"), Some(42));
        assert_eq!(parse_user_id(" 100.0 "), Some(100));
        assert_eq!(parse_user_id("100.5"), None);
        assert_eq!(parse_user_id("x"), None);
        assert_eq!(parse_user_id(""), None);
    }

    #[test]
    fn test_fields_follow_columns() {
        let record = Record::from_member(&member(3, Some("Ann"), Some("Lee")), None);
        let fields = record.fields();
        assert_eq!(fields.len(), Record::COLUMNS.len());
        assert_eq!(fields[0], "3");
        assert_eq!(fields[4], "Ann Lee");
        assert_eq!(fields[6], "false");
        assert_eq!(fields[7], "true");
        assert_eq!(fields[8], "");
    }

    #[test]
    fn test_member_deserializes_with_missing_fields() {
        let m: Member = serde_json::from_str(r#"{"id": 5, "first_name": "Олег"}"#).unwrap();
        assert_eq!(m.id, 5);
        assert_eq!(m.first_name.as_deref(), Some("Олег"));
        assert!(m.username.is_none());
        assert!(!m.bot);
        assert!(m.photo_url.is_none());
    }
}
