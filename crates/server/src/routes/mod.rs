pub mod auth;
pub mod chat;
pub mod clocking;
pub mod courses;
pub mod points;
pub mod supervisors;
pub mod tasks;
pub mod users;
