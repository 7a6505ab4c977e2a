use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use super::{FrameStream, InvocationRequest, Upstream};
use crate::error::InvokeError;

/// Longest frame accepted before the stream is treated as broken.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Invokes the agent over HTTP and frames the streamed body into lines.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    endpoint: Url,
    auth_token: Option<String>,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, endpoint: Url, auth_token: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            auth_token,
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn invoke(&self, request: InvocationRequest) -> Result<FrameStream, InvokeError> {
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header(ACCEPT, "text/event-stream")
            .json(&request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| InvokeError::from_reqwest(e, "invoking the agent"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvokeError::from_status(status, body));
        }

        debug!(%status, tools = request.tools.len(), "Agent stream opened");
        Ok(frame_lines(response.bytes_stream()))
    }
}

/// Split a chunked body into lines.
///
/// Lines may span chunks, `\r\n` endings are accepted, and a final line
/// without a terminator is still yielded. Bytes that are not valid UTF-8 are
/// replaced rather than ending the stream, so the decoder sees such a line
/// as malformed. Body errors become [`InvokeError::Transport`] items.
pub fn frame_lines<S, E>(body: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let reader = StreamReader::new(body.map_err(io::Error::other));
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_FRAME_LEN);
    FramedRead::new(reader, codec)
        .map_ok(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
            String::from_utf8_lossy(line).into_owned()
        })
        .map_err(|e| match e {
            AnyDelimiterCodecError::Io(e) => {
                InvokeError::Transport(format!("stream interrupted: {e}"))
            }
            AnyDelimiterCodecError::MaxChunkLengthExceeded => {
                InvokeError::Transport(format!("frame longer than {MAX_FRAME_LEN} bytes"))
            }
        })
        .boxed()
}
