use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use super::{ListingClient, ListingError, ListingPage};

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v2/";
const LIST_FIELDS: &str = "nextPageToken,items(id,mimeType,title,createdDate,modifiedDate,fileSize,videoMediaMetadata,downloadUrl,fileExtension)";
const MAX_RESULTS: &str = "1000";

/// Drive v2 `files.list` client.
///
/// The underlying [`Client`] is expected to already carry the
/// `Authorization` header for the session it belongs to. `timeout` bounds
/// each page request including its body.
#[derive(Debug, Clone)]
pub struct DriveV2Listing {
    client: Client,
    base: String,
    timeout: Duration,
}

impl DriveV2Listing {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self::with_base(client, DEFAULT_API_BASE, timeout)
    }

    /// Point the client at a different API root (must end with `/`).
    pub fn with_base(client: Client, base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base: base.into(),
            timeout,
        }
    }

    fn files_url(&self) -> Result<Url, ListingError> {
        Url::parse(&self.base)
            .and_then(|base| base.join("files"))
            .map_err(|e| ListingError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl ListingClient for DriveV2Listing {
    async fn list_page(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListingPage, ListingError> {
        let mut url = self.files_url()?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("q", &format!("'{}' in parents and trashed=false", parent_id))
                .append_pair("fields", LIST_FIELDS)
                .append_pair("maxResults", MAX_RESULTS);
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status, message));
        }

        // a body cut short or stalled is retried, only bad JSON is final
        let body = response.bytes().await.map_err(request_error)?;
        serde_json::from_slice(&body).map_err(|e| ListingError::Malformed(e.to_string()))
    }
}

fn request_error(e: reqwest::Error) -> ListingError {
    if e.is_timeout() {
        ListingError::Transient(format!("timed out: {}", e))
    } else {
        ListingError::Transient(e.to_string())
    }
}

fn classify_status(status: StatusCode, message: String) -> ListingError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ListingError::Transient(format!("{}: {}", status, message))
    } else {
        ListingError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "gone".into()),
            ListingError::Rejected { status: 404, .. }
        ));
    }

    #[test]
    fn test_files_url() {
        let listing = DriveV2Listing::new(Client::new(), Duration::from_secs(5));
        assert_eq!(
            listing.files_url().unwrap().as_str(),
            "https://www.googleapis.com/drive/v2/files"
        );
    }

    /// Serve one connection on a local port with `respond`, returning the
    /// listing base to point a client at.
    async fn serve_once<F, Fut>(respond: F) -> String
    where
        F: FnOnce(tokio::net::TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                respond(socket).await;
            }
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_silent_server_times_out_as_transient() {
        let base = serve_once(|socket| async move {
            // hold the connection open without answering
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        })
        .await;
        let listing = DriveV2Listing::with_base(Client::new(), base, Duration::from_millis(200));

        let outcome =
            tokio::time::timeout(Duration::from_secs(5), listing.list_page("root", None)).await;
        let err = outcome.expect("listing should give up on its own").unwrap_err();
        assert!(err.is_transient(), "{}", err);
    }

    #[tokio::test]
    async fn test_truncated_body_is_transient() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let base = serve_once(|mut socket| async move {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"items\": [",
                )
                .await;
            let _ = socket.shutdown().await;
        })
        .await;
        let listing = DriveV2Listing::with_base(Client::new(), base, Duration::from_secs(2));

        let err = listing.list_page("root", None).await.unwrap_err();
        assert!(err.is_transient(), "{}", err);
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let base = serve_once(|mut socket| async move {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 9\r\nconnection: close\r\n\r\nnot json!")
                .await;
            let _ = socket.shutdown().await;
        })
        .await;
        let listing = DriveV2Listing::with_base(Client::new(), base, Duration::from_secs(2));

        let err = listing.list_page("root", None).await.unwrap_err();
        assert!(matches!(err, ListingError::Malformed(_)), "{}", err);
    }
}
