use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::error::{ProxyError, ProxyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
}

/// Streamed or buffered response body (spec §4.2 "transport contract").
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Result<Bytes, ProxyError>>),
}

pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    /// Collects a streamed body into one buffer, for non-streaming callers.
    pub async fn collect_bytes(self) -> ProxyResult<Bytes> {
        match self.body {
            UpstreamBody::Bytes(bytes) => Ok(bytes),
            UpstreamBody::Stream(mut rx) => {
                let mut buf = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Transport seam (spec §4.2 `do(ctx, method, url, headers, body)`),
/// grounded on the teacher's dedicated provider-transport trait
/// (`gproxy-provider-core::provider::UpstreamHttpRequest/Response`) which
/// keeps request translation decoupled from the concrete HTTP client so
/// tests can substitute a stub.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> ProxyResult<UpstreamResponse>;
}

/// Per-call timeout configuration (spec §4.2 "Timeouts: connect, TLS
/// handshake, response header, and expect-continue are configured
/// separately").
#[derive(Debug, Clone, Copy)]
pub struct TransportTimeouts {
    pub connect_ms: u64,
    pub response_header_ms: u64,
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeouts: TransportTimeouts, proxy_url: Option<&str>) -> ProxyResult<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_millis(timeouts.connect_ms))
            .timeout(std::time::Duration::from_millis(timeouts.response_header_ms));
        if let Some(proxy) = proxy_url {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| ProxyError::Transport(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamTransport for ReqwestTransport {
    async fn send(&self, request: UpstreamRequest) -> ProxyResult<UpstreamResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let (tx, rx) = mpsc::channel(16);
        let mut stream = response.bytes_stream();
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let mapped = chunk.map_err(|e| ProxyError::Transport(e.to_string()));
                if tx.send(mapped).await.is_err() {
                    break;
                }
            }
        });

        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Stream(rx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTransport {
        status: u16,
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl UpstreamTransport for StubTransport {
        async fn send(&self, _request: UpstreamRequest) -> ProxyResult<UpstreamResponse> {
            let (tx, rx) = mpsc::channel(16);
            for chunk in self.chunks.clone() {
                tx.send(Ok(Bytes::from(chunk))).await.unwrap();
            }
            Ok(UpstreamResponse {
                status: self.status,
                headers: HashMap::new(),
                body: UpstreamBody::Stream(rx),
            })
        }
    }

    #[tokio::test]
    async fn collect_bytes_concatenates_stream_chunks() {
        let transport = StubTransport {
            status: 200,
            chunks: vec!["foo", "bar"],
        };
        let response = transport
            .send(UpstreamRequest {
                method: HttpMethod::Post,
                url: "http://example.invalid".to_string(),
                headers: HashMap::new(),
                body: None,
            })
            .await
            .unwrap();
        let bytes = response.collect_bytes().await.unwrap();
        assert_eq!(&bytes[..], b"foobar");
    }
}
