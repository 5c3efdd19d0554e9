pub mod cipher;
mod state;

pub use cipher::{SessionCipher, SessionError};
pub use state::SessionState;
