use std::time::Duration;

use counsel_agents::{LlmProvider, LlmRequest, OpenAiProvider, ReplyEvent, ReplyStream};
use counsel_common::Error;
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(chunks: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn test_openai_completion() {
    let mock_server = MockServer::start().await;

    let response_body = json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4o-2024-08-06",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": "직장 스트레스와 수면 문제를 이야기함.",
            },
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 9,
            "completion_tokens": 12,
            "total_tokens": 21
        }
    });

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-4o", "stream": false, "temperature": 0.0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let request = LlmRequest::single_prompt("gpt-4o", "요약해 주세요").with_temperature(0.0);

    let response = provider.complete(&request).await.unwrap();

    assert_eq!(response.text, "직장 스트레스와 수면 문제를 이야기함.");
    assert_eq!(response.stop_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage.unwrap().output_tokens, 12);
}

#[tokio::test]
async fn test_openai_system_message_goes_first() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "system", "content": "요약가"},
                {"role": "user", "content": "대화"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o",
            "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]
        })))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let request = LlmRequest::single_prompt("gpt-4o", "대화").with_system("요약가");

    assert_eq!(provider.complete(&request).await.unwrap().text, "ok");
}

#[tokio::test]
async fn test_openai_stream() {
    let mock_server = MockServer::start().await;

    let body = sse_body(&[
        json!({
            "id": "chatcmpl-123",
            "object": "chat.completion.chunk",
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": null}]
        }),
        json!({
            "id": "chatcmpl-123",
            "object": "chat.completion.chunk",
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"content": "안녕"}, "finish_reason": null}]
        }),
        json!({
            "id": "chatcmpl-123",
            "object": "chat.completion.chunk",
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"content": "하세요"}, "finish_reason": null}]
        }),
        json!({
            "id": "chatcmpl-123",
            "object": "chat.completion.chunk",
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        }),
        json!({
            "id": "chatcmpl-123",
            "model": "gpt-4o",
            "choices": [],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        }),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true, "stream_options": {"include_usage": true}})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let request = LlmRequest::single_prompt("gpt-4o", "안녕하세요").with_temperature(0.3);

    let mut stream = provider.complete_stream(&request).await.unwrap();

    let mut full_text = String::new();
    let mut usage_found = false;
    let mut stop_reason = None;

    while let Some(result) = stream.next().await {
        let response = result.unwrap();
        full_text.push_str(&response.delta);
        if let Some(usage) = response.usage {
            assert_eq!(usage.input_tokens, 5);
            usage_found = true;
        }
        if response.stop_reason.is_some() {
            stop_reason = response.stop_reason;
        }
    }

    assert_eq!(full_text, "안녕하세요");
    assert_eq!(stop_reason.as_deref(), Some("stop"));
    assert!(usage_found, "Usage should be reported");
}

#[tokio::test]
async fn test_openai_error_status_is_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("bad-key".to_string(), Some(mock_server.uri()));
    let request = LlmRequest::single_prompt("gpt-4o", "hi");

    let err = match provider.complete_stream(&request).await {
        Ok(_) => panic!("expected an error for status 401"),
        Err(e) => e.to_string(),
    };
    assert!(err.contains("status 401"), "unexpected error: {err}");
    assert!(err.contains("invalid api key"));
}

#[tokio::test]
async fn test_openai_health_check() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    assert!(provider.health_check().await.unwrap());
}

#[tokio::test]
async fn test_openai_stream_error_frame_ends_stream_with_error() {
    let mock_server = MockServer::start().await;

    let body = format!(
        "data: {}\n\ndata: {}\n\ndata: {}\n\n",
        json!({
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"content": "안녕"}, "finish_reason": null}]
        }),
        json!({
            "error": {"message": "The server had an error while processing your request.", "type": "server_error"}
        }),
        json!({
            "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"content": "never delivered"}, "finish_reason": null}]
        }),
    );

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let request = LlmRequest::single_prompt("gpt-4o", "안녕하세요");
    let mut stream = provider.complete_stream(&request).await.unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap().delta, "안녕");
    let err = match stream.next().await {
        Some(Err(e)) => e.to_string(),
        other => panic!("expected an error frame, got {:?}", other.map(|r| r.map(|c| c.delta))),
    };
    assert!(err.contains("server_error"), "unexpected error: {err}");
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_reply_stream_surfaces_upstream_error_frame() {
    let mock_server = MockServer::start().await;

    let body = format!(
        "data: {}\n\ndata: {}\n\n",
        json!({"model": "gpt-4o", "choices": [{"index": 0, "delta": {"content": "안녕"}, "finish_reason": null}]}),
        json!({"error": {"message": "overloaded", "type": "server_error"}}),
    );

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let request = LlmRequest::single_prompt("gpt-4o", "안녕하세요");
    let mut replies = ReplyStream::open(&provider, &request, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(
        replies.next().await.unwrap().unwrap(),
        ReplyEvent::Fragment("안녕".to_string())
    );
    assert!(matches!(replies.next().await, Some(Err(Error::Agent(_)))));
    assert!(replies.next().await.is_none(), "no Finished after an error");
}
