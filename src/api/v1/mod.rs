pub mod connections;
pub mod group_notify;
pub mod health;
