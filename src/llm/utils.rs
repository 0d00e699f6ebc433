use crate::error::{Result, TutorError};
use reqwest::Response;
use tracing::debug;

/// Pass successful responses through, turn everything else into a
/// `TutorError::Provider` carrying the status and the vendor's error body.
pub async fn check_response_error(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .map_err(|e| TutorError::Network(e.to_string()))?;
    debug!("Provider returned status {}: {}", status, body);

    Err(TutorError::Provider {
        status: status.as_u16(),
        body,
    })
}
