//! [`KernelManager`] over the Jupyter server REST API.

use std::time::Duration;

use log::debug;
use reqwest::{Client, Method, RequestBuilder, StatusCode};

use super::{KernelError, KernelManager, KernelModel};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which endpoint stops a kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownRoute {
    /// `DELETE /api/kernels/{id}`
    #[default]
    KernelsApi,
    /// `POST /voila/api/shutdown/{id}`, answered with 204
    ViewerStop,
}

#[derive(Clone)]
pub struct JupyterServerClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    route: ShutdownRoute,
}

impl std::fmt::Debug for JupyterServerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JupyterServerClient")
            .field("base_url", &self.base_url)
            .field("route", &self.route)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl JupyterServerClient {
    pub fn new(base_url: &str) -> Result<Self, KernelError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!("widget-restore/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            route: ShutdownRoute::default(),
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_route(mut self, route: ShutdownRoute) -> Self {
        self.route = route;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => {
                builder.header(reqwest::header::AUTHORIZATION, format!("token {}", token))
            }
            None => builder,
        }
    }
}

impl KernelManager for JupyterServerClient {
    async fn shutdown_kernel(&self, kernel_id: &str) -> Result<(), KernelError> {
        let (method, url) = match self.route {
            ShutdownRoute::KernelsApi => (
                Method::DELETE,
                self.url(&format!("/api/kernels/{}", kernel_id)),
            ),
            ShutdownRoute::ViewerStop => (
                Method::POST,
                self.url(&format!("/voila/api/shutdown/{}", kernel_id)),
            ),
        };
        debug!("[kernel-rest] {} {}", method, url);
        let response = self.request(method, &url).send().await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(KernelError::NotFound(kernel_id.to_string())),
            status => Err(KernelError::Status {
                status: status.as_u16(),
                url,
            }),
        }
    }

    async fn get_kernel_model(&self, kernel_id: &str) -> Result<Option<KernelModel>, KernelError> {
        let url = self.url(&format!("/api/kernels/{}", kernel_id));
        debug!("[kernel-rest] GET {}", url);
        let response = self.request(Method::GET, &url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<KernelModel>().await?)),
            status => Err(KernelError::Status {
                status: status.as_u16(),
                url,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned response per connection and records request heads.
    async fn canned_server(responses: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();

        tokio::spawn(async move {
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                recorded
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&head).to_string());
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        (format!("http://{}/", addr), seen)
    }

    fn response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn test_shutdown_deletes_kernel_with_token() {
        let (base, seen) = canned_server(vec![response("204 No Content", "")]).await;
        let client = JupyterServerClient::new(&base)
            .unwrap()
            .with_token(Some("secret".into()));

        client.shutdown_kernel("k-1").await.unwrap();

        let requests = seen.lock().unwrap();
        assert!(requests[0].starts_with("DELETE /api/kernels/k-1 HTTP/1.1"));
        assert!(requests[0]
            .to_ascii_lowercase()
            .contains("authorization: token secret"));
    }

    #[tokio::test]
    async fn test_viewer_stop_route() {
        let (base, seen) = canned_server(vec![response("204 No Content", "")]).await;
        let client = JupyterServerClient::new(&base)
            .unwrap()
            .with_route(ShutdownRoute::ViewerStop);

        client.shutdown_kernel("k-2").await.unwrap();
        assert!(seen.lock().unwrap()[0].starts_with("POST /voila/api/shutdown/k-2 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_kernel_lookup() {
        let body =
            r#"{"id": "k-3", "name": "python3", "execution_state": "busy", "connections": 2}"#;
        let (base, _) = canned_server(vec![
            response("200 OK", body),
            response("404 Not Found", r#"{"message": "Kernel does not exist"}"#),
        ])
        .await;
        let client = JupyterServerClient::new(&base).unwrap();

        let model = client.get_kernel_model("k-3").await.unwrap().unwrap();
        assert_eq!(model.name, "python3");
        assert_eq!(model.connections, Some(2));
        assert_eq!(client.get_kernel_model("k-4").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_errors_surface_status() {
        let (base, _) = canned_server(vec![
            response("500 Internal Server Error", "{}"),
            response("404 Not Found", "{}"),
        ])
        .await;
        let client = JupyterServerClient::new(&base).unwrap();

        assert!(matches!(
            client.shutdown_kernel("k-5").await,
            Err(KernelError::Status { status: 500, .. })
        ));
        assert!(matches!(
            client.shutdown_kernel("k-5").await,
            Err(KernelError::NotFound(id)) if id == "k-5"
        ));
    }
}
