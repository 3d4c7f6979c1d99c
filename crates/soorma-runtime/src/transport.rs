//! Small HTTP response-handling helpers shared by the bus, registry, and
//! memory clients.

use soorma_types::ErrorBody;

use crate::error::RuntimeError;

/// Parse a successful JSON response, or translate a non-2xx response into
/// the spec §7 error taxonomy via its `ErrorBody`.
pub(crate) async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RuntimeError> {
    if !response.status().is_success() {
        return Err(api_error_from_response(response).await);
    }
    Ok(response.json::<T>().await?)
}

/// Translate a non-2xx response into a [`RuntimeError::Api`], falling
/// back to a generic message if the body isn't a well-formed
/// [`ErrorBody`].
pub(crate) async fn api_error_from_response(response: reqwest::Response) -> RuntimeError {
    let status = response.status().as_u16();
    match response.json::<ErrorBody>().await {
        Ok(body) => RuntimeError::Api { status, kind: body.error, message: body.message },
        Err(_) => RuntimeError::Api { status, kind: "unknown".into(), message: "non-JSON error response".into() },
    }
}

/// `Ok(())` on any 2xx response, else the translated API error.
pub(crate) async fn ok_or_api_error(response: reqwest::Response) -> Result<(), RuntimeError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(api_error_from_response(response).await)
    }
}
