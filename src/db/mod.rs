//! Database module
//!
//! This module provides:
//! - Database connection pool management
//! - User and session store traits with SQLite and in-memory backends
//! - Database migrations
//! - Data models and schemas

pub mod manager;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;

pub use manager::DatabaseManager;
pub use memory::MemoryStore;
pub use models::{NewSession, Role, Session, User};
pub use repository::{SessionRepository, SessionStore, UserRepository, UserStore};
