use anyhow::Context;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::ops::Deref;
use std::time::Duration;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// A wrapper for re-using the reqwest client.
#[derive(Debug, Clone)]
pub struct HttpClient(reqwest::Client);

impl HttpClient {
    /// Build a client sending `headers` on every request, on top of the user agent.
    pub fn with_headers(mut headers: HeaderMap) -> anyhow::Result<Self> {
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .with_context(|| "fail to build http client")?;
        Ok(Self(inner))
    }

    /// Make a GET request to the given URL and parse the JSON response to given T type.
    ///
    /// # Error
    /// Return error if:
    ///     * Fail to send HTTP request
    ///     * Response status is not a success
    ///     * Fail to parse response into given type
    #[inline]
    pub async fn to_t<T>(&self, url: impl reqwest::IntoUrl + std::fmt::Display) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        // for debugging usage
        let url_str = url.to_string();

        self.get(url)
            .send()
            .await
            .with_context(|| format!("fail to send GET request to url: `{}`", url_str))?
            .error_for_status()
            .with_context(|| format!("`{}` responded with an error status", url_str))?
            .json::<T>()
            .await
            .with_context(|| {
                format!(
                    "fail to parse response from url: `{}` to type `{}`",
                    url_str,
                    std::any::type_name::<T>()
                )
            })
    }
}

impl Deref for HttpClient {
    type Target = reqwest::Client;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
