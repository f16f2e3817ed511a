pub mod api;
pub mod auth;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod discussions;
pub mod error;
pub mod files;
pub mod listings;
pub mod model;
pub mod users;
