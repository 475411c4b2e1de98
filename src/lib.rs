pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod poems;
pub mod services;
pub mod state;
pub mod translate;

pub use app::App;
pub use config::Config;
pub use error::{AppError, Result};
