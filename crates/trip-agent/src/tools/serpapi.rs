use reqwest::{Client, Url};
use serde_json::Value;

const DEFAULT_ENDPOINT: &str = "https://serpapi.com/search.json";

/// Search parameters, in the order they are sent.
pub(crate) type SearchParams = Vec<(&'static str, String)>;

/// An error returned by [`SerpApiClient`].
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// No API key was configured.
    #[error(
        "API key is missing. Set it in the SERPAPI_API_KEY environment variable."
    )]
    MissingApiKey,
    /// The request could not be built.
    #[error("invalid search request: {0}")]
    InvalidRequest(String),
    /// The request failed on the way.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// The service reported an error.
    #[error("{message}")]
    Service {
        /// The HTTP status.
        status: u16,
        /// The error reported by the service.
        message: String,
    },
}

/// A client of the SerpAPI search service, shared by the search tools.
///
/// Cloning is cheap, the underlying connection pool is shared.
#[derive(Clone, Debug)]
pub struct SerpApiClient {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl SerpApiClient {
    /// Creates a client. Without an API key, every search fails with
    /// [`SearchError::MissingApiKey`].
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|key| !key.is_empty()),
            endpoint: DEFAULT_ENDPOINT.to_owned(),
        }
    }

    /// Sets a custom search endpoint.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Runs one search and returns the decoded response.
    ///
    /// The returned future does not borrow `self`.
    pub(crate) fn search(
        &self,
        params: SearchParams,
    ) -> impl Future<Output = Result<Value, SearchError>> + Send + 'static {
        let client = self.client.clone();
        let prepared = self
            .api_key
            .as_deref()
            .ok_or(SearchError::MissingApiKey)
            .and_then(|api_key| search_url(&self.endpoint, api_key, &params));
        async move {
            let url = prepared?;
            let resp = client.get(url).send().await?;
            let status = resp.status();
            let body: Value = resp.json().await?;
            trace!("search finished with {status}");

            if let Some(message) = body.get("error").and_then(Value::as_str) {
                return Err(SearchError::Service {
                    status: status.as_u16(),
                    message: message.to_owned(),
                });
            }
            if !status.is_success() {
                return Err(SearchError::Service {
                    status: status.as_u16(),
                    message: format!("unexpected status {status}"),
                });
            }
            Ok(body)
        }
    }
}

fn search_url(
    endpoint: &str,
    api_key: &str,
    params: &SearchParams,
) -> Result<Url, SearchError> {
    debug!("searching with {params:?}");
    let pairs = params
        .iter()
        .map(|(key, value)| (*key, value.as_str()))
        .chain([("api_key", api_key)]);
    Url::parse_with_params(endpoint, pairs)
        .map_err(|err| SearchError::InvalidRequest(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url() {
        let params = vec![
            ("engine", "google_hotels".to_owned()),
            ("q", "New York".to_owned()),
        ];
        let url = search_url(DEFAULT_ENDPOINT, "k3y", &params).unwrap();
        assert_eq!(
            url.as_str(),
            "https://serpapi.com/search.json?engine=google_hotels&q=New+York&api_key=k3y"
        );

        let err = search_url("not a url", "k3y", &params).unwrap_err();
        assert!(matches!(err, SearchError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = SerpApiClient::new(Some(String::new()));
        let err = client.search(vec![]).await.unwrap_err();
        assert!(matches!(err, SearchError::MissingApiKey));
        assert_eq!(
            err.to_string(),
            "API key is missing. Set it in the SERPAPI_API_KEY environment variable."
        );
    }
}
