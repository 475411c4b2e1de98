use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: String,
    pub user_id: String,
    pub poem_id: String,
    pub created_at: DateTime<Utc>,
}

impl Favorite {
    /// Record handed back when the favorite only landed in local storage.
    pub fn synthesized(user_id: &str, poem_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: now.timestamp_millis().to_string(),
            user_id: user_id.to_string(),
            poem_id: poem_id.to_string(),
            created_at: now,
        }
    }
}

/// Public profile fields joined onto comments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub poem_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Profile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub poem_id: String,
    pub user_id: String,
    pub content: String,
}

/// Sort newest-first, the display order for comments.
pub fn sort_newest_first(comments: &mut [Comment]) {
    comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn comment_author_joins_from_profile_alias() {
        let row = r#"{
            "id": "c1",
            "poem_id": "p1",
            "user_id": "u1",
            "content": "好诗",
            "created_at": "2025-10-15T08:00:00+00:00",
            "updated_at": "2025-10-15T08:00:00+00:00",
            "author": {"username": "moon", "avatar_url": null}
        }"#;
        let comment: Comment = serde_json::from_str(row).unwrap();
        assert_eq!(comment.author.unwrap().username.as_deref(), Some("moon"));
    }

    #[test]
    fn sorts_comments_newest_first() {
        let now = Utc::now();
        let make = |id: &str, age: i64| Comment {
            id: id.into(),
            poem_id: "p".into(),
            user_id: "u".into(),
            content: "x".into(),
            created_at: now - Duration::minutes(age),
            author: None,
        };
        let mut comments = vec![make("old", 10), make("new", 0), make("mid", 5)];
        sort_newest_first(&mut comments);
        let ids: Vec<_> = comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["new", "mid", "old"]);
    }

    #[test]
    fn profile_update_skips_unset_fields() {
        let update = ProfileUpdate {
            bio: Some("诗人".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({"bio": "诗人"}));
    }
}
