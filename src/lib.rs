//! Identity and session core of an authenticating reverse proxy.
//!
//! Requests carry either a bearer access token or a pair of cookies (the access
//! token and an encrypted refresh session). [`services::auth::Authenticator`]
//! turns them into a [`services::auth::UserContext`], transparently renewing an
//! expired access token with single-flight refresh per session.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod services;
pub mod state;
