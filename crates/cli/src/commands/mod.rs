pub mod call;
pub mod config;
pub mod status;
pub mod tools;
