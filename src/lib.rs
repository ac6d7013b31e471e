//! dvarapala - A multi-tenant user identity service
//!
//! This crate stores user accounts scoped to an owning application (tenant),
//! authenticates them with email and password, and guards every non-public
//! HTTP route with a signed bearer token.

pub mod accounts;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod otel;
pub mod server;
