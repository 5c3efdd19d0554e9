pub mod health;
pub mod userinfo;
