//! Token lifecycle: validity checks, single-flight refresh, and the
//! "restart the OAuth flow" policy.
//!
//! # Refresh state machine
//!
//! ```text
//! START ──► NO_TOKEN
//!   │
//!   ├────► NO_REFRESH_TOKEN
//!   │
//!   ├────► TOKEN_TOO_OLD          (refresh token past its validity window)
//!   │
//!   └────► EXCHANGING ──► SUCCESS (new record appended)
//!                    └──► EXCHANGE_FAILED
//! ```
//!
//! Every terminal state other than SUCCESS is reported as `None` from
//! [`TokenLifecycleManager::refresh`] with the reason logged.

mod manager;
mod status;

pub use manager::{AuthorizedToken, LifecyclePolicy, RefreshTicket, TokenLifecycleManager};
pub use status::{format_span, TokenHealth, TokenStatus};

#[cfg(test)]
mod tests;
