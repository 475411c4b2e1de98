use std::sync::OnceLock;

use regex::Regex;

use crate::error::AppError;

/// User-facing failure categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    Network,
    Unauthorized,
    Forbidden,
    NotFound,
    EmailNotConfirmed,
    MissingParameter,
    MissingFunction,
    InvalidData,
    TableMissing,
    Database(Option<String>),
    Generic,
}

impl Category {
    pub fn message(&self) -> String {
        match self {
            Category::Network => "网络连接失败，请检查网络连接".into(),
            Category::Unauthorized => "认证失败，请重新登录".into(),
            Category::Forbidden => "权限不足，无法执行此操作".into(),
            Category::NotFound => "请求的资源不存在".into(),
            Category::EmailNotConfirmed => "邮箱未验证，请检查您的邮箱并点击验证链接".into(),
            Category::MissingParameter => "缺少必要参数".into(),
            Category::MissingFunction => "函数或表不存在".into(),
            Category::InvalidData => "数据格式错误".into(),
            Category::TableMissing => "数据库表不存在，请先创建表结构".into(),
            Category::Database(Some(code)) => format!("数据库错误: {code}"),
            Category::Database(None) => "数据库操作失败，请检查数据库连接".into(),
            Category::Generic => "操作失败，请稍后重试".into(),
        }
    }
}

pub fn translate(error: &AppError) -> Category {
    match error {
        AppError::PolicyDenied(_) => Category::Forbidden,
        AppError::RelationMissing(_) => Category::TableMissing,
        AppError::NotFound(_) => Category::NotFound,
        AppError::EmailNotConfirmed => Category::EmailNotConfirmed,
        AppError::NotAuthenticated => Category::Unauthorized,
        AppError::Validation(_) => Category::InvalidData,
        AppError::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
            Category::Network
        }
        AppError::Http(e) => e
            .status()
            .and_then(|s| by_status(s.as_u16()))
            .unwrap_or(Category::Network),
        AppError::Remote {
            status,
            code,
            message,
        } => {
            if let Some(category) = code.as_deref().and_then(by_postgrest_code) {
                return category;
            }
            if let Some(category) = status
                .or_else(|| status_in_message(message))
                .and_then(by_status)
            {
                return category;
            }
            if message.contains("Network Error") {
                return Category::Network;
            }
            match code {
                Some(code) => Category::Database(Some(code.clone())),
                None if message.to_lowercase().contains("database") => Category::Database(None),
                _ => Category::Generic,
            }
        }
        _ => Category::Generic,
    }
}

/// Translated message for display.
pub fn user_message(error: &AppError) -> String {
    translate(error).message()
}

fn by_postgrest_code(code: &str) -> Option<Category> {
    let category = match code {
        "PGRST116" => Category::NotFound,
        "PGRST201" => Category::MissingParameter,
        "PGRST202" => Category::MissingFunction,
        "PGRST203" => Category::Forbidden,
        "PGRST204" => Category::InvalidData,
        "PGRST205" => Category::TableMissing,
        _ => return None,
    };
    Some(category)
}

fn by_status(status: u16) -> Option<Category> {
    match status {
        401 => Some(Category::Unauthorized),
        403 => Some(Category::Forbidden),
        404 => Some(Category::NotFound),
        _ => None,
    }
}

fn status_in_message(message: &str) -> Option<u16> {
    static STATUS: OnceLock<Option<Regex>> = OnceLock::new();
    let re = STATUS
        .get_or_init(|| Regex::new(r"\b(401|403|404)\b").ok())
        .as_ref()?;
    re.captures(message)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(status: Option<u16>, code: Option<&str>, message: &str) -> AppError {
        AppError::Remote {
            status,
            code: code.map(String::from),
            message: message.into(),
        }
    }

    #[test]
    fn maps_postgrest_codes() {
        assert_eq!(translate(&remote(Some(400), Some("PGRST201"), "x")), Category::MissingParameter);
        assert_eq!(translate(&remote(Some(404), Some("PGRST202"), "x")), Category::MissingFunction);
        assert_eq!(translate(&remote(Some(400), Some("PGRST204"), "x")), Category::InvalidData);
        assert_eq!(
            user_message(&remote(Some(404), Some("PGRST205"), "x")),
            "数据库表不存在，请先创建表结构"
        );
    }

    #[test]
    fn unmapped_codes_name_the_code() {
        let category = translate(&remote(Some(409), Some("23505"), "duplicate key"));
        assert_eq!(category.message(), "数据库错误: 23505");
    }

    #[test]
    fn maps_statuses_and_message_hints() {
        assert_eq!(translate(&remote(Some(401), None, "JWT expired")), Category::Unauthorized);
        assert_eq!(translate(&remote(None, None, "Request failed with status 403")), Category::Forbidden);
        assert_eq!(translate(&remote(None, None, "Network Error")), Category::Network);
        assert_eq!(translate(&remote(None, None, "database is down")), Category::Database(None));
        assert_eq!(translate(&remote(Some(500), None, "boom")), Category::Generic);
        assert_eq!(translate(&remote(None, None, "error 4040")), Category::Generic);
    }

    #[test]
    fn maps_classified_errors() {
        let denied = AppError::from_remote(Some(401), Some("42501".into()), "row-level security policy");
        assert_eq!(translate(&denied), Category::Forbidden);
        assert_eq!(translate(&AppError::EmailNotConfirmed), Category::EmailNotConfirmed);
        assert_eq!(translate(&AppError::NotAuthenticated), Category::Unauthorized);
        assert_eq!(
            user_message(&AppError::OperationFailed("disk full".into())),
            "操作失败，请稍后重试"
        );
    }
}
