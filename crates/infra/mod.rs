pub mod db;
pub mod rate_limit;
