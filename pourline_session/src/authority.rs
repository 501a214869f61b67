//! The backend token authority
//!
//! Two endpoints are consumed: the exchange endpoint, which turns an
//! identity assertion into a backend token pair at sign-in, and the refresh
//! endpoint, which rotates an expired pair. Both speak the same token-pair
//! shape, and both fail whole: a missing field, an unexpected token type, a
//! non-success status, or a transport error is a failure with no partial
//! result.

use async_trait::async_trait;
use thiserror::Error;

use crate::{IdentityAssertionRef, RefreshTokenRef};

pub mod dto;

/// A client for the backend's token endpoints
///
/// The session manager is written against this trait; production code uses
/// [`HttpTokenAuthority`], tests substitute a scripted fake.
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// Exchanges an identity assertion for a backend token pair
    async fn exchange_assertion(
        &self,
        assertion: &IdentityAssertionRef,
    ) -> Result<dto::TokenPair, AuthorityError>;

    /// Trades a refresh token for a fresh token pair
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<dto::TokenPair, AuthorityError>;
}

/// An error while requesting tokens from the backend
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The backend answered with an error status
    #[error("token endpoint returned an error: {body}")]
    ErrorWithBody {
        /// The underlying status error
        source: reqwest::Error,
        /// The body of the error response
        body: String,
    },
    /// The token pair could not be deserialized
    #[error("error deserializing token pair from the backend")]
    TokenBodyError(#[from] serde_json::Error),
    /// The response body could not be read
    #[error("error reading response body")]
    BodyReadError(reqwest::Error),
    /// The request could not be sent
    #[error("error sending request to the token endpoint")]
    RequestSend(reqwest::Error),
    /// The backend issued something other than a bearer pair
    #[error("unexpected token type: {0:?}")]
    UnexpectedTokenType(String),
    /// The identity assertion was empty; nothing was sent
    #[error("identity assertion is empty")]
    EmptyAssertion,
}

/// The production token authority, speaking JSON over HTTP
#[derive(Clone, Debug)]
pub struct HttpTokenAuthority {
    client: reqwest::Client,
    exchange_url: reqwest::Url,
    refresh_url: reqwest::Url,
}

impl HttpTokenAuthority {
    /// Constructs an authority for the given backend base URL
    ///
    /// The exchange and refresh endpoints are derived as `auth/exchange`
    /// and `auth/refresh` under the base.
    ///
    /// # Panics
    ///
    /// Panics if the base URL cannot carry a relative path (for example a
    /// `data:` URL).
    pub fn new(client: reqwest::Client, mut base_url: reqwest::Url) -> Self {
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        let exchange_url = base_url
            .join("auth/exchange")
            .expect("base URL accepts a relative path");
        let refresh_url = base_url
            .join("auth/refresh")
            .expect("base URL accepts a relative path");
        Self {
            client,
            exchange_url,
            refresh_url,
        }
    }
}

#[async_trait]
impl TokenAuthority for HttpTokenAuthority {
    #[tracing::instrument(err, skip(self, assertion), fields(endpoint = %self.exchange_url))]
    async fn exchange_assertion(
        &self,
        assertion: &IdentityAssertionRef,
    ) -> Result<dto::TokenPair, AuthorityError> {
        if assertion.as_str().is_empty() {
            return Err(AuthorityError::EmptyAssertion);
        }
        request_token_pair(
            &self.client,
            self.exchange_url.clone(),
            &dto::ExchangeRequest { assertion },
        )
        .await
    }

    #[tracing::instrument(err, skip(self, refresh_token), fields(endpoint = %self.refresh_url))]
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<dto::TokenPair, AuthorityError> {
        request_token_pair(
            &self.client,
            self.refresh_url.clone(),
            &dto::RefreshRequest { refresh_token },
        )
        .await
    }
}

async fn request_token_pair<B: serde::Serialize>(
    client: &reqwest::Client,
    url: reqwest::Url,
    body: &B,
) -> Result<dto::TokenPair, AuthorityError> {
    tracing::trace!("requesting token pair from backend");

    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(AuthorityError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from backend"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp
            .text()
            .await
            .map_err(AuthorityError::BodyReadError)?;
        return Err(AuthorityError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(AuthorityError::BodyReadError)?;
    let pair: dto::TokenPair = serde_json::from_slice(&body)?;

    if !pair.token_type.eq_ignore_ascii_case("bearer") {
        return Err(AuthorityError::UnexpectedTokenType(pair.token_type));
    }

    tracing::info!("received new token pair");

    Ok(pair)
}
