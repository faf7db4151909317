// Encrypted append-only token history
pub mod credentials;

// Token lifecycle: validity, refresh, restart policy
pub mod token;

// Background refresh loop
pub mod scheduler;

// Token endpoint client and authorization URL
pub mod oauth;

// HTTP API
pub mod api;

pub mod clock;
pub mod config;
pub mod error;

#[cfg(test)]
mod testing;
