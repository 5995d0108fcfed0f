pub mod admin;
pub mod config;
pub mod content;
pub mod health;
pub mod system;
pub mod users;
