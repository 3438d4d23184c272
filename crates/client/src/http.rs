use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use snafu::{ResultExt, ensure};
use tokio::sync::oneshot;

use crate::backend::{BoxFuture, ChatBackend};
use crate::error::{
    ClientResult, DecodeBodySnafu, HttpStatusSnafu, MissingBaseUrlSnafu, RequestSnafu,
    UnauthorizedSnafu,
};
use crate::sse::SseDecoder;
use crate::stream::{
    StreamEventPayload, StreamHandle, StreamRequest, StreamSender, decode_frame, make_event_stream,
};
use crate::types::{ChatId, ChatRecord, DocumentUpload, NewChat, UploadedDocument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            token: token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        }
    }
}

/// `ChatBackend` over the service's REST and SSE endpoints.
#[derive(Clone)]
pub struct HttpChatBackend {
    http: reqwest::Client,
    base_url: String,
    credential: Arc<ArcSwapOption<String>>,
}

impl HttpChatBackend {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        ensure!(
            !config.base_url.is_empty(),
            MissingBaseUrlSnafu {
                stage: "build-client",
            }
        );

        let http = reqwest::Client::builder()
            .build()
            .context(RequestSnafu {
                stage: "build-client",
            })?;

        Ok(Self {
            http,
            base_url: config.base_url,
            credential: Arc::new(ArcSwapOption::from(config.token.map(Arc::new))),
        })
    }

    pub fn has_credential(&self) -> bool {
        self.credential.load().is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn token(&self, stage: &'static str) -> ClientResult<Arc<String>> {
        self.credential.load_full().ok_or_else(|| {
            UnauthorizedSnafu {
                stage,
                reason: "no credential attached",
            }
            .build()
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        stage: &'static str,
    ) -> ClientResult<Response> {
        let token = self.token(stage)?;
        let response = request
            .bearer_auth(token.as_str())
            .send()
            .await
            .context(RequestSnafu { stage })?;
        check_status(response, stage).await
    }

    async fn send_json<T>(
        &self,
        request: reqwest::RequestBuilder,
        stage: &'static str,
    ) -> ClientResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.send(request, stage).await?;
        let body = response.bytes().await.context(RequestSnafu { stage })?;
        serde_json::from_slice(&body).context(DecodeBodySnafu { stage })
    }

    async fn run_stream_worker(
        http: reqwest::Client,
        url: String,
        query: Vec<(&'static str, String)>,
        sender: StreamSender,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = sender.target();

        let response = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(target = ?target, "stream cancelled before the server answered");
                return;
            }
            response = http.get(&url).query(&query).send() => response,
        };

        let response = match response.context(RequestSnafu { stage: "open-stream" }) {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(target = ?target, error = %error, "failed to open chat stream");
                sender.send(StreamEventPayload::Failed(error.to_string()));
                return;
            }
        };

        let response = match check_status(response, "open-stream").await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(target = ?target, error = %error, "chat stream rejected");
                sender.send(StreamEventPayload::Failed(error.to_string()));
                return;
            }
        };

        if !sender.send(StreamEventPayload::Opened) {
            return;
        }

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(target = ?target, "chat stream cancelled");
                    return;
                }
                next_chunk = body.next() => {
                    match next_chunk {
                        Some(Ok(chunk)) => {
                            if !forward_chunk(&mut decoder, &chunk, &sender) {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(target = ?target, error = %source, "chat stream read failed");
                            sender.send(StreamEventPayload::Failed(source.to_string()));
                            return;
                        }
                        None => break,
                    }
                }
            }
        }

        if let Some(payload) = decoder.finish().as_ref().and_then(decode_frame) {
            sender.send(payload);
        }
        tracing::debug!(target = ?target, "chat stream body finished");
    }
}

fn forward_chunk(decoder: &mut SseDecoder, chunk: &Bytes, sender: &StreamSender) -> bool {
    decoder
        .push(chunk)
        .iter()
        .filter_map(decode_frame)
        .all(|payload| sender.send(payload))
}

async fn check_status(response: Response, stage: &'static str) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED {
        return UnauthorizedSnafu {
            stage,
            reason: "server rejected the credential",
        }
        .fail();
    }

    let body = response.text().await.unwrap_or_default();
    HttpStatusSnafu {
        stage,
        status: status.as_u16(),
        body,
    }
    .fail()
}

impl ChatBackend for HttpChatBackend {
    fn list_chats(&self) -> BoxFuture<'_, ClientResult<Vec<ChatRecord>>> {
        Box::pin(async move {
            let chats: Vec<ChatRecord> = self
                .send_json(self.http.get(self.url("/chats")), "list-chats")
                .await?;
            tracing::debug!(count = chats.len(), "listed chats");
            Ok(chats)
        })
    }

    fn create_chat(&self, title: String) -> BoxFuture<'_, ClientResult<ChatRecord>> {
        Box::pin(async move {
            let request = self.http.post(self.url("/chats")).json(&NewChat { title });
            self.send_json(request, "create-chat").await
        })
    }

    fn get_chat(&self, chat_id: ChatId) -> BoxFuture<'_, ClientResult<ChatRecord>> {
        Box::pin(async move {
            let request = self.http.get(self.url(&format!("/chats/{chat_id}")));
            self.send_json(request, "get-chat").await
        })
    }

    fn delete_chat(&self, chat_id: ChatId) -> BoxFuture<'_, ClientResult<()>> {
        Box::pin(async move {
            let request = self.http.delete(self.url(&format!("/chats/{chat_id}")));
            self.send(request, "delete-chat").await?;
            Ok(())
        })
    }

    fn upload_document(
        &self,
        upload: DocumentUpload,
    ) -> BoxFuture<'_, ClientResult<UploadedDocument>> {
        Box::pin(async move {
            let stage = "upload-document";
            let part = Part::bytes(upload.bytes)
                .file_name(upload.file_name)
                .mime_str("application/pdf")
                .context(RequestSnafu { stage })?;
            let form = Form::new().part("file", part);
            let request = self.http.post(self.url("/pdfs/upload")).multipart(form);
            self.send_json(request, stage).await
        })
    }

    fn open_stream(&self, request: StreamRequest) -> ClientResult<StreamHandle> {
        let token = self.token("open-stream")?;
        let target = request.target;
        let url = self.url(&format!("/chats/{}/messages", target.chat_id));
        let query = request.query_pairs(token.as_str());

        let (stream, sender, cancel_rx) = make_event_stream(target);
        let worker = Box::pin(Self::run_stream_worker(
            self.http.clone(),
            url,
            query,
            sender,
            cancel_rx,
        ));

        Ok(StreamHandle { stream, worker })
    }

    /// Replaces the credential used by every later call, including stream opens.
    fn set_credential(&self, token: Option<String>) {
        let token = token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        tracing::debug!(has_token = token.is_some(), "credential updated");
        self.credential.store(token.map(Arc::new));
    }
}
