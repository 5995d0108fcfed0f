pub mod admin;
pub mod content;
pub mod health;
pub mod system;
