pub mod commands;
pub mod health;
pub mod metrics;
pub mod operator;
