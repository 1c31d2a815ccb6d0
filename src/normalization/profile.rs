use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;
use crate::harvest::store::TableRow;

/// One harvested profile. Field order is the column order of the results file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub username: String,
    pub following: u64,
    pub followers: u64,
    pub media_count: u64,
    pub bio: String,
    pub pronouns: String,
    pub fullname: String,
    pub external_url: String,
    pub category: String,
    pub contact_phone_number: String,
    pub public_email: String,
    pub is_private: bool,
    pub is_business: bool,
    pub is_in_canada: bool,
    pub is_verified: bool,
}

impl TableRow for ProfileRecord {
    const HEADER: &'static [&'static str] = &[
        "username",
        "following",
        "followers",
        "media_count",
        "bio",
        "pronouns",
        "fullname",
        "external_url",
        "category",
        "contact_phone_number",
        "public_email",
        "is_private",
        "is_business",
        "is_in_canada",
        "is_verified",
    ];
    const KEY_COLUMN: &'static str = "username";

    fn key(&self) -> &str {
        &self.username
    }
}

const PRONOUN_SEPARATOR: &str = "/";

fn str_field(user: &Value, key: &str) -> String {
    user.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn count_field(user: &Value, key: &str) -> u64 {
    user.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn flag_field(user: &Value, key: &str) -> bool {
    user.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Commas would otherwise leak into downstream tools that split on them.
fn strip_commas(s: &str) -> String {
    s.replace(',', "")
}

fn flatten_bio(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ',' | '\n' | '\r'))
        .collect()
}

fn join_pronouns(user: &Value) -> String {
    let Some(items) = user.get("pronouns").and_then(Value::as_array) else {
        return String::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(strip_commas)
        .collect::<Vec<_>>()
        .join(PRONOUN_SEPARATOR)
}

impl ProfileRecord {
    /// Build a record from a lookup payload shaped `{ result: { user: {..} } }`.
    ///
    /// Only a missing `result.user` object is an error; every field inside it
    /// falls back to its default when absent, null or of the wrong type. A
    /// missing username falls back to the key that was requested.
    pub fn from_payload(requested_key: &str, payload: &Value) -> Result<Self, FetchError> {
        let user = payload
            .get("result")
            .and_then(|r| r.get("user"))
            .filter(|u| u.is_object())
            .ok_or_else(|| FetchError::Transport("payload has no result.user object".into()))?;

        let username = match user.get("username").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => requested_key.to_string(),
        };

        Ok(Self {
            username,
            following: count_field(user, "following_count"),
            followers: count_field(user, "follower_count"),
            media_count: count_field(user, "media_count"),
            bio: flatten_bio(&str_field(user, "biography")),
            pronouns: join_pronouns(user),
            fullname: strip_commas(&str_field(user, "full_name")),
            external_url: str_field(user, "external_url"),
            category: strip_commas(&str_field(user, "category")),
            contact_phone_number: str_field(user, "contact_phone_number"),
            public_email: str_field(user, "public_email"),
            is_private: flag_field(user, "is_private"),
            is_business: flag_field(user, "is_business"),
            is_in_canada: flag_field(user, "is_in_canada"),
            is_verified: flag_field(user, "is_verified"),
        })
    }
}
