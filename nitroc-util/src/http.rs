pub use client::{Client, ClientError, Method, Response, StatusCode};
pub use uri::{InvalidUriError, Uri};

mod uri {
    use std::fmt::Display;
    use std::str::FromStr;

    use axum::http;
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub struct InvalidUriError(String);

    impl Display for InvalidUriError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt(f)
        }
    }

    impl From<http::uri::InvalidUri> for InvalidUriError {
        fn from(value: http::uri::InvalidUri) -> Self {
            InvalidUriError(value.to_string())
        }
    }

    impl From<http::uri::InvalidUriParts> for InvalidUriError {
        fn from(value: http::uri::InvalidUriParts) -> Self {
            InvalidUriError(value.to_string())
        }
    }

    /// An absolute URI
    ///
    /// Server addresses are often configured as a bare `host:port`, in that
    /// case parsing assumes plain `http`.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct Uri(http::Uri);

    impl Uri {
        pub fn new(uri: http::Uri) -> Self {
            Self(uri)
        }

        /// Build a new URI re-using the scheme and authority of `base_uri`
        /// with the given path and optional query string
        ///
        /// The path is appended to any path `base_uri` already has, so a
        /// server mounted under a prefix keeps it.
        pub fn from_parts(
            base_uri: Uri,
            path: &str,
            query: Option<&str>,
        ) -> Result<Self, InvalidUriError> {
            let prefix = base_uri.0.path().trim_end_matches('/');
            let path = format!("{prefix}{path}");
            let path_and_query = if let Some(qs) = query {
                http::uri::PathAndQuery::from_maybe_shared(format!("{path}?{qs}",))?
            } else {
                http::uri::PathAndQuery::from_str(&path)?
            };
            let mut parts = base_uri.0.into_parts();
            parts.path_and_query = Some(path_and_query);

            Ok(http::Uri::from_parts(parts).map(Self::new)?)
        }

        pub fn host(&self) -> Option<&str> {
            self.0.host()
        }
    }

    impl Display for Uri {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt(f)
        }
    }

    impl FromStr for Uri {
        type Err = InvalidUriError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let s = s.trim().trim_end_matches('/');
            if s.is_empty() {
                return Err(InvalidUriError("empty URI".to_owned()));
            }

            let uri = if s.contains("://") {
                http::Uri::from_str(s)?
            } else {
                http::Uri::from_maybe_shared(format!("http://{s}"))?
            };

            if uri.host().is_none() {
                return Err(InvalidUriError(format!("missing host in '{s}'")));
            }

            Ok(Self(uri))
        }
    }

    impl Serialize for Uri {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            serializer.serialize_str(&self.to_string())
        }
    }

    impl<'de> Deserialize<'de> for Uri {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        }
    }

}

mod client {
    use std::time::Duration;

    use reqwest::RequestBuilder;
    use serde::de::DeserializeOwned;

    use super::uri::Uri;

    pub type Method = reqwest::Method;
    pub type StatusCode = reqwest::StatusCode;

    #[derive(Debug, thiserror::Error)]
    pub enum ClientError {
        #[error("failed to build client: {0}")]
        Build(reqwest::Error),

        #[error(transparent)]
        Client(reqwest::Error),

        #[error(transparent)]
        Server(reqwest::Error),
    }

    impl ClientError {
        /// True if the request failed because a connect or total timeout
        /// elapsed
        pub fn is_timeout(&self) -> bool {
            match self {
                ClientError::Build(_) => false,
                ClientError::Client(e) | ClientError::Server(e) => e.is_timeout(),
            }
        }
    }

    #[derive(Debug)]
    pub struct Response(reqwest::Response);

    impl Response {
        pub fn status(&self) -> StatusCode {
            self.0.status()
        }

        pub async fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
            self.0.json().await.map_err(ClientError::Server)
        }
    }

    // Based on: https://github.com/ramsayleung/rspotify/blob/master/rspotify-http/src/reqwest.rs
    #[derive(Debug, Clone)]
    pub struct Client {
        client: reqwest::Client,
        timeout: Option<Duration>,
    }

    impl Client {
        /// Create a client with a total request timeout and an optional
        /// connect timeout
        pub fn new(
            timeout: Option<Duration>,
            connect_timeout: Option<Duration>,
        ) -> Result<Self, ClientError> {
            let mut builder = reqwest::Client::builder();
            if let Some(connect_timeout) = connect_timeout {
                builder = builder.connect_timeout(connect_timeout);
            }
            let client = builder.build().map_err(ClientError::Build)?;

            Ok(Self { client, timeout })
        }

        /// Thin wrapper around [reqwest::Request], this is your gateway to
        /// a fully customizable client.
        ///
        /// The response is returned for any status code, it is up to the
        /// caller to decide what a failure is.
        pub async fn request<D>(
            &self,
            method: Method,
            uri: &Uri,
            decorator: D,
        ) -> Result<Response, ClientError>
        where
            D: FnOnce(RequestBuilder) -> RequestBuilder,
        {
            let mut request = self.client.request(method, uri.to_string());

            if let Some(timeout) = self.timeout {
                request = request.timeout(timeout);
            }

            request = decorator(request);

            Ok(Response(request.send().await.map_err(ClientError::Client)?))
        }
    }
}
