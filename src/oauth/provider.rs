//! Authorization URL for the interactive (human-in-the-loop) consent step.

use crate::config::OAuthConfig;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthorizeUrlError {
    #[error("OAuth client id is not configured")]
    MissingClientId,
    #[error("OAuth redirect URI is not configured")]
    MissingRedirectUri,
}

/// Builds `authorize_url?client_id=..&redirect_uri=..`.
pub fn build_authorization_url(config: &OAuthConfig) -> Result<String, AuthorizeUrlError> {
    if config.client_id.trim().is_empty() {
        return Err(AuthorizeUrlError::MissingClientId);
    }
    let redirect_uri = config
        .redirect_uri
        .as_deref()
        .filter(|uri| !uri.trim().is_empty())
        .ok_or(AuthorizeUrlError::MissingRedirectUri)?;

    Ok(format!(
        "{}?client_id={}&redirect_uri={}",
        config.authorize_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(redirect_uri)
    ))
}
