use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User record as returned by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

/// Signed-in user as the application sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
}

impl From<&AuthUser> for User {
    fn from(auth: &AuthUser) -> Self {
        let email = auth.email.clone().unwrap_or_default();
        let username = auth
            .user_metadata
            .get("username")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match email.split_once('@') {
                Some((local, _)) if !local.is_empty() => local.to_string(),
                _ => email.clone(),
            });

        User {
            id: auth.id.clone(),
            email,
            username,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub user: User,
    /// True when the backend created the account but issued no session yet.
    pub requires_email_confirmation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn auth_user(email: Option<&str>, metadata: Value) -> AuthUser {
        AuthUser {
            id: "u1".into(),
            email: email.map(String::from),
            user_metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn prefers_metadata_username() {
        let user = User::from(&auth_user(Some("libai@tang.cn"), json!({"username": "青莲居士"})));
        assert_eq!(user.username, "青莲居士");
    }

    #[test]
    fn falls_back_to_email_local_part() {
        let user = User::from(&auth_user(Some("dufu@tang.cn"), json!({})));
        assert_eq!(user.username, "dufu");

        let user = User::from(&auth_user(Some("dufu@tang.cn"), json!({"username": "  "})));
        assert_eq!(user.username, "dufu");
    }

    #[test]
    fn handles_missing_email() {
        let user = User::from(&auth_user(None, json!({})));
        assert_eq!(user.email, "");
        assert_eq!(user.username, "");
    }
}
