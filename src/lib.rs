#![doc = "The `formshive_auth` library crate."]
#![doc = ""]
#![doc = "This crate contains the session core used by Formshive clients: the session model,"]
#![doc = "its durable persistence, token expiry evaluation, the login/challenge flow and the"]
#![doc = "bounded-retry token refresh. Everything is reached through [`auth::RustyAuth`]."]

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use crate::auth::RustyAuth;
pub use crate::config::AuthConfig;
pub use crate::error::AuthError;
pub use crate::models::{LoggedInSession, LoginMethod, LoginRequest, Session};
