use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::Comment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poem {
    pub id: String,
    pub title: String,
    pub author: String,
    pub dynasty: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set on poems that only exist in the local fallback store.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_local: bool,
}

/// A submission as entered by the user, before it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPoem {
    pub title: String,
    pub author: String,
    pub dynasty: String,
    pub content: String,
}

impl NewPoem {
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        dynasty: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            dynasty: dynasty.into(),
            content: content.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("title", &self.title),
            ("author", &self.author),
            ("dynasty", &self.dynasty),
            ("content", &self.content),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(AppError::Validation(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }

    /// Materialize as a local-only poem.
    pub fn into_local(self, id: String, now: DateTime<Utc>) -> Poem {
        Poem {
            id,
            title: self.title,
            author: self.author,
            dynasty: self.dynasty,
            content: self.content,
            created_at: now,
            updated_at: now,
            is_local: true,
        }
    }
}

/// A poem together with its comments, as shown on the detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoemDetail {
    #[serde(flatten)]
    pub poem: Poem,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_fields() {
        let poem = NewPoem::new("静夜思", "李白", "  ", "床前明月光");
        let err = poem.validate().unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("dynasty")));
    }

    #[test]
    fn local_flag_is_omitted_for_remote_poems() {
        let now = Utc::now();
        let mut poem = NewPoem::new("春晓", "孟浩然", "唐代", "春眠不觉晓").into_local("1".into(), now);
        let json = serde_json::to_value(&poem).unwrap();
        assert_eq!(json["is_local"], true);

        poem.is_local = false;
        let json = serde_json::to_value(&poem).unwrap();
        assert!(json.get("is_local").is_none());
    }

    #[test]
    fn parses_backend_row_without_local_flag() {
        let row = r#"{
            "id": "5b0c7f0e-8d5e-4f7b-9a57-1d3c1d0f6a11",
            "title": "江雪",
            "author": "柳宗元",
            "dynasty": "唐代",
            "content": "千山鸟飞绝",
            "created_at": "2025-10-14T18:35:13.123456+00:00",
            "updated_at": "2025-10-14T18:35:13.123456+00:00"
        }"#;
        let poem: Poem = serde_json::from_str(row).unwrap();
        assert!(!poem.is_local);
        assert_eq!(poem.author, "柳宗元");
    }
}
