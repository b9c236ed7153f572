use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;

/// A completed request. Transport failures are represented with status 0
/// and an error message so checks can run against them like any response.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    body: Bytes,
    headers_size: usize,
    duration: Duration,
    error: Option<String>,
}

impl Response {
    pub async fn new(res: reqwest::Response, started: tokio::time::Instant) -> Result<Self, reqwest::Error> {
        let status = res.status().as_u16();
        // Calculate headers size once during construction
        let headers_size = res.headers().iter().map(|(k, v)| k.as_str().len() + v.len() + 4).sum::<usize>() + 12;
        let body = res.bytes().await?;
        Ok(Self {
            status,
            body,
            headers_size,
            duration: started.elapsed(),
            error: None,
        })
    }

    pub fn failed(error: String, duration: Duration) -> Self {
        Self {
            status: 0,
            body: Bytes::new(),
            headers_size: 0,
            duration,
            error: Some(error),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Transport error, or a status outside 2xx/3xx.
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || !(200..400).contains(&self.status)
    }

    /// Returns total response size (body + headers + status line approximation)
    pub fn total_size(&self) -> usize {
        if self.error.is_some() {
            return 0;
        }
        self.body.len() + self.headers_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_response_has_no_payload() {
        let r = Response::failed("Request timeout".into(), Duration::from_millis(5));
        assert_eq!(r.status(), 0);
        assert!(r.is_failure());
        assert_eq!(r.error(), Some("Request timeout"));
        assert_eq!(r.total_size(), 0);
        assert!(r.json::<Vec<serde_json::Value>>().is_err());
    }
}
