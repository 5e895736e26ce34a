// Configuration from environment
pub mod config;

// CSRF double-submit tokens
pub mod csrf;

// Encrypted session cookie (the Salesforce connection record)
pub mod session;

// OAuth lifecycle: authorize, exchange, refresh, revoke
pub mod oauth;

// Audit trail for auth and PII events
pub mod audit;

// HTTP API and request guard
pub mod api;
