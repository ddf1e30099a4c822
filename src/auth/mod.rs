//! # Authentication Module
//!
//! Keeps the catalog account's OAuth access token valid. The one-time
//! authorization-code exchange lives outside this crate; here we only hold a
//! seeded token and refresh it.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Token`] | Access + refresh token with absolute expiry and scopes |
//! | [`TokenRefresher`] | Seam for the refresh-token grant |
//! | [`TokenManager`] | Single-flight refresh with an expiry skew |

mod manager;
mod token;

pub use manager::{TokenManager, TokenRefresher};
pub use token::Token;
