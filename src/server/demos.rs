//! Built-in demo gateways, also exposed through the CLI.

use async_trait::async_trait;
use bytes::Bytes;

use crate::headers::header;
use crate::server::gateway::{Gateway, RequestMessage, RequestReceiver, ResponseSender, Scope};
use crate::Result;

/// Answers every request with a greeting.
#[derive(Clone, Copy, Debug, Default)]
pub struct HelloGateway;

#[async_trait]
impl Gateway for HelloGateway {
    async fn handle(
        &self,
        scope: Scope,
        _request: RequestReceiver,
        response: ResponseSender,
    ) -> Result<()> {
        let content = format!("Hello from an HTTP/{} connection!\n", scope.http_version);
        response.start(
            200,
            vec![
                header("content-type", "text/plain"),
                header("content-length", content.len().to_string()),
            ],
        )?;
        response.body(content.as_bytes(), false).await
    }
}

/// Echoes the request back: the request line, headers, and body.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoGateway;

#[async_trait]
impl Gateway for EchoGateway {
    async fn handle(
        &self,
        scope: Scope,
        mut request: RequestReceiver,
        response: ResponseSender,
    ) -> Result<()> {
        let mut body = Vec::new();
        loop {
            match request.receive().await {
                RequestMessage::Body { data, more } => {
                    body.extend_from_slice(&data);
                    if !more {
                        break;
                    }
                }
                RequestMessage::Disconnect => return Ok(()),
            }
        }
        let mut content = format!("{} {}\n", scope.method, scope.path);
        for (name, value) in &scope.headers {
            content.push_str(&format!(
                "{}: {}\n",
                String::from_utf8_lossy(name),
                String::from_utf8_lossy(value)
            ));
        }
        content.push('\n');
        let mut content = content.into_bytes();
        content.extend_from_slice(&body);
        response.start(
            200,
            vec![
                header("content-type", "text/plain"),
                header("content-length", content.len().to_string()),
            ],
        )?;
        response.body(&content, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_gateways_are_objects() {
        let _: Vec<std::sync::Arc<dyn Gateway>> = vec![
            std::sync::Arc::new(HelloGateway),
            std::sync::Arc::new(EchoGateway),
        ];
    }
}

/// Looks a demo gateway up by its CLI name.
pub fn find(name: &str) -> Option<std::sync::Arc<dyn Gateway>> {
    match name {
        "hello" => Some(std::sync::Arc::new(HelloGateway)),
        "echo" => Some(std::sync::Arc::new(EchoGateway)),
        _ => None,
    }
}
