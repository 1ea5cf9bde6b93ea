//! `Valknut` Server
//!
//! Access control for a Discord community bot and its web dashboard:
//! role synchronization, permission resolution and second-factor session trust.

pub mod access;
pub mod admin;
pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod guild;
pub mod platform;
pub mod sync;
