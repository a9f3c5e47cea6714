use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, COOKIE, RANGE, SET_COOKIE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use super::{cookie_header, ByteStream, InfoResponse, Transport, TransportError};

/// [`Transport`] over a session's reqwest client.
///
/// `timeout` bounds each whole metadata request and each individual body
/// chunk of a stream, so a long video can be streamed while a stalled
/// upstream still fails the read.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn with_cookie(builder: RequestBuilder, cookie: Option<&str>) -> RequestBuilder {
        match cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }
}

fn map_send_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Request(e.to_string())
    }
}

fn check_status(response: &Response) -> Result<(), TransportError> {
    let status = response.status();
    if status == StatusCode::FORBIDDEN {
        return Err(TransportError::Forbidden(response.url().to_string()));
    }
    if !status.is_success() {
        return Err(TransportError::Status(status.as_u16()));
    }
    Ok(())
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch_video_info(&self, url: &str) -> Result<InfoResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(&response)?;

        let cookie = cookie_header(
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        );
        let body = response.text().await.map_err(map_send_error)?;

        Ok(InfoResponse { body, cookie })
    }

    async fn content_length(&self, url: &str, cookie: Option<&str>) -> Result<u64, TransportError> {
        let request = Self::with_cookie(self.client.get(url).timeout(self.timeout), cookie);
        let response = request.send().await.map_err(map_send_error)?;
        check_status(&response)?;

        // Body is dropped unread
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0))
    }

    async fn open_range(
        &self,
        url: &str,
        offset: u64,
        cookie: Option<&str>,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        let request = Self::with_cookie(
            self.client.get(url).header(RANGE, format!("bytes={}-", offset)),
            cookie,
        );
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(map_send_error)?;

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            // Reading at or past the end
            return Ok(Box::new(ReqwestStream::empty(self.timeout)));
        }
        check_status(&response)?;

        // A plain 200 means the range was ignored and the body starts at 0
        let skip = if response.status() == StatusCode::PARTIAL_CONTENT {
            0
        } else {
            offset
        };

        Ok(Box::new(ReqwestStream {
            body: response.bytes_stream().boxed(),
            buffer: BytesMut::new(),
            skip,
            done: false,
            timeout: self.timeout,
        }))
    }
}

struct ReqwestStream {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: BytesMut,
    skip: u64,
    done: bool,
    timeout: Duration,
}

impl ReqwestStream {
    fn empty(timeout: Duration) -> Self {
        Self {
            body: futures::stream::empty::<reqwest::Result<Bytes>>().boxed(),
            buffer: BytesMut::new(),
            skip: 0,
            done: true,
            timeout,
        }
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        match tokio::time::timeout(self.timeout, self.body.next()).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(None) => Ok(None),
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(e))) => Err(map_send_error(e)),
        }
    }
}

#[async_trait]
impl ByteStream for ReqwestStream {
    async fn read(&mut self, len: usize) -> Result<Bytes, TransportError> {
        while !self.done && self.buffer.len() < len {
            match self.next_chunk().await? {
                None => self.done = true,
                Some(mut chunk) => {
                    if self.skip > 0 {
                        let dropped = usize::try_from(self.skip)
                            .unwrap_or(usize::MAX)
                            .min(chunk.len());
                        chunk.advance(dropped);
                        self.skip -= dropped as u64;
                    }
                    self.buffer.extend_from_slice(&chunk);
                }
            }
        }

        let n = len.min(self.buffer.len());
        Ok(self.buffer.split_to(n).freeze())
    }
}
