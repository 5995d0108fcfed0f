pub mod adaptive_rate_limit;
pub mod rate_limit;
pub mod traffic;
