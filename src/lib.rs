// Configuration loading and validation
pub mod config;

// Key/value persistence and atomic file writes
pub mod storage;

// Credential data model and cache storage
pub mod credentials;

// Grant flows, silent renewal and the loopback listener
pub mod auth;

// Cursor-based mail sync
pub mod sync;
