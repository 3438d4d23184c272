use parley_client::{
    ChatBackend, ChatId, ClientConfig, ClientError, DocumentUpload, HttpChatBackend,
    StreamEventPayload, StreamId, StreamRequest, StreamTarget,
};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_json(id: i64, title: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": title,
        "user_id": 1,
        "created_at": "2024-05-01T10:00:00",
        "updated_at": "2024-05-01T10:05:00",
        "messages": []
    })
}

fn backend(server: &MockServer, token: Option<&str>) -> HttpChatBackend {
    HttpChatBackend::new(ClientConfig::new(
        server.uri(),
        token.map(ToString::to_string),
    ))
    .unwrap()
}

async fn collect_payloads(backend: &HttpChatBackend, request: StreamRequest) -> Vec<StreamEventPayload> {
    let handle = backend.open_stream(request).unwrap();
    let mut stream = handle.stream;
    let worker = tokio::spawn(handle.worker);

    let mut payloads = Vec::new();
    while let Some(event) = stream.recv().await {
        payloads.push(event.payload);
    }
    worker.await.unwrap();
    payloads
}

#[tokio::test]
async fn list_chats_sends_bearer_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chats"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([chat_json(2, "Second"), chat_json(1, "First")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let chats = backend(&server, Some("secret")).list_chats().await.unwrap();

    assert_eq!(chats.len(), 2);
    assert_eq!(chats[0].id, ChatId::new(2));
    assert_eq!(chats[1].title, "First");
}

#[tokio::test]
async fn rejected_credential_maps_to_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chats/9"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let error = backend(&server, Some("expired"))
        .get_chat(ChatId::new(9))
        .await
        .unwrap_err();

    assert!(error.is_unauthorized());
    assert_eq!(error.stage(), "get-chat");
}

#[tokio::test]
async fn missing_credential_fails_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let backend = backend(&server, None);
    assert!(backend.list_chats().await.unwrap_err().is_unauthorized());

    let target = StreamTarget::new(ChatId::new(1), StreamId::new(1));
    let Err(error) = backend.open_stream(StreamRequest::new(target, "hi")) else {
        panic!("stream must not open without a credential");
    };
    assert!(error.is_unauthorized());
}

#[tokio::test]
async fn server_errors_keep_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/chats/4"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Chat not found"))
        .mount(&server)
        .await;

    let error = backend(&server, Some("secret"))
        .delete_chat(ChatId::new(4))
        .await
        .unwrap_err();

    let ClientError::HttpStatus { status, body, .. } = error else {
        panic!("expected status error, got {error:?}");
    };
    assert_eq!(status, 404);
    assert_eq!(body, "Chat not found");
}

#[tokio::test]
async fn create_and_upload_decode_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_json(5, "New Chat")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pdfs/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "doc-17",
            "filename": "paper.pdf",
            "status": "processed"
        })))
        .mount(&server)
        .await;

    let backend = backend(&server, Some("secret"));
    let chat = backend.create_chat("New Chat".to_string()).await.unwrap();
    assert_eq!(chat.id, ChatId::new(5));

    let uploaded = backend
        .upload_document(DocumentUpload::new("paper.pdf", b"%PDF-1.4".to_vec()))
        .await
        .unwrap();
    assert_eq!(uploaded.id, "doc-17");
    assert_eq!(uploaded.status, "processed");
}

#[tokio::test]
async fn stream_forwards_decoded_events_in_order() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"type\":\"search_results\",\"results\":[{\"title\":\"Rust\",\"content\":\"\",\"url\":\"https://rust-lang.org\"}]}\n\n",
        "data: {\"type\":\"content\",\"content\":\"Hel\"}\n\n",
        ": keep-alive\n\n",
        "data: {\"type\":\"content\",\"content\":\"lo\"}\n\n",
        "data: {\"type\":\"end\"}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/chats/7/messages"))
        .and(query_param("message", "Hi there"))
        .and(query_param("search", "true"))
        .and(query_param("token", "secret"))
        .and(query_param_is_missing("pdf_id"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let backend = backend(&server, Some("secret"));
    let target = StreamTarget::new(ChatId::new(7), StreamId::new(3));
    let payloads =
        collect_payloads(&backend, StreamRequest::new(target, "Hi there").with_search(true)).await;

    assert_eq!(payloads[0], StreamEventPayload::Opened);
    assert!(matches!(&payloads[1], StreamEventPayload::SearchResults(results) if results.len() == 1));
    assert_eq!(payloads[2], StreamEventPayload::Content("Hel".to_string()));
    assert_eq!(payloads[3], StreamEventPayload::Content("lo".to_string()));
    assert_eq!(payloads[4], StreamEventPayload::End);
    assert_eq!(payloads.len(), 5);
}

#[tokio::test]
async fn stream_rejection_is_reported_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chats/7/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let backend = backend(&server, Some("secret"));
    let target = StreamTarget::new(ChatId::new(7), StreamId::new(1));
    let payloads = collect_payloads(&backend, StreamRequest::new(target, "hi")).await;

    assert_eq!(payloads.len(), 1);
    assert!(matches!(&payloads[0], StreamEventPayload::Failed(message) if message.contains("500")));
}
