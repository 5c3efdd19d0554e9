pub mod authenticator;
pub mod claims;
pub mod cookies;
pub mod error;
pub mod factory;
pub mod identity;
pub mod issuer;
pub mod locator;
pub mod renewal;
pub mod session;
pub mod token;
pub mod verifier;

pub use authenticator::Authenticator;
pub use error::AuthError;
pub use factory::build_authenticator;
pub use identity::UserContext;
