#![cfg(feature = "http")]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;

use crate::errors::CommunicationError;
use crate::transport::{HttpTransport, TransportRequest, TransportResponse};

/// [`HttpTransport`] over a pooled reqwest client with rustls.
#[derive(Clone)]
pub struct ReqwestTransport {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CommunicationError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| CommunicationError::Connection(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

fn map_error(e: reqwest::Error) -> CommunicationError {
    if e.is_timeout() {
        CommunicationError::Timeout
    } else {
        CommunicationError::Connection(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, CommunicationError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| CommunicationError::Connection(format!("bad method {}", request.method)))?;

        let mut builder = self.client.request(method, self.url(&request.path));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(map_error)?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = resp.bytes().await.map_err(map_error)?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
