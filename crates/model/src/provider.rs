use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;

    /// Returns whether sending the same request again may succeed.
    ///
    /// Only rate limiting is considered transient by default. Providers
    /// with better knowledge (e.g. a `Retry-After` header) may override it.
    #[inline]
    fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::RateLimitExceeded
    }
}

/// A model provider: the entry for sampling a conversation turn.
///
/// Once the provider is created, it should behave like a stateless object.
/// The orchestrator may send requests for different threads concurrently
/// through the same provider, and may drop it at any time.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Sends a request to the model.
    ///
    /// The returned future must not borrow `self` or `req`, so that it can
    /// be moved to another task.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}
