use crate::error::ServerError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::Stream;
use parley::{
    agent::Agent,
    memory::{ChatMemory, MessageWindowChatMemory, TokenWindowChatMemory},
    models::message::Message,
    prompt_template::load_prompt,
    providers::base::{stream_to_message, StreamEvent},
    rag::{
        container::DockerContainer, weaviate::WeaviateEmbeddingStore, EmbeddingSearchRequest,
        EmbeddingStore, EmbeddingStoreContentRetriever, EmbeddingStoreIngestor,
        FileSystemDocumentLoader, InMemoryEmbeddingStore, TextSegment,
    },
    services::TextUtils,
    systems::{CalculatorSystem, McpSystem},
};
use serde::Deserialize;
use serde_json::json;
use std::{
    collections::hash_map::DefaultHasher,
    convert::Infallible,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const ERROR_PREFIX: &str = "Sorry, an error occurred while processing the request: ";

const RECIPE_TEMPLATE: &str =
    "Create a recipe for a {{dishType}} with the following ingredients: {{ingredients}}";
const STREAM_PROMPT: &str = "Write a 100-word poem about Java and AI";
const MCP_QUESTION: &str =
    "What is 5+12? Use the provided tool to answer and always assume that the tool is correct.";
const TOOL_QUESTION: &str = "What is the square root of the sum of the numbers of letters in the words \"hello\" and \"world\"?";
const MEMORY_SYSTEM: &str = "You are a senior developer explaining to another senior developer, the project you are working on is an e-commerce platform with Java back-end, Oracle database, and Spring Data JPA";
const MEMORY_FIRST_QUESTION: &str = "How do I optimize database queries for a large-scale e-commerce platform? Answer short in three to five lines maximum.";
const MEMORY_SECOND_QUESTION: &str =
    "Give a concrete example implementation of the first point? Be short, 10 lines of code maximum.";
const TRANSLATE_TEXT: &str = "Hello, how are you?";
const SUMMARY_TEXT: &str = "AI, or artificial intelligence, is a branch of computer science that aims to create machines that mimic human intelligence. This can range from simple tasks such as recognizing patterns or speech, to more complex tasks like making decisions or predictions.";
const RAG_QUESTION: &str = "Can I cancel my reservation?";
const WEAVIATE_SEGMENTS: [&str; 2] = ["I like football.", "The weather is good today."];
const WEAVIATE_QUERY: &str = "What is your favourite sport?";

const WEAVIATE_PORT: u16 = 8080;
const WEAVIATE_READY_PATH: &str = "/v1/.well-known/ready";
const WEAVIATE_ENV: [(&str, &str); 5] = [
    ("AUTHENTICATION_ANONYMOUS_ACCESS_ENABLED", "true"),
    ("PERSISTENCE_DATA_PATH", "/var/lib/weaviate"),
    ("DEFAULT_VECTORIZER_MODULE", "none"),
    ("CLUSTER_HOSTNAME", "node1"),
    ("QUERY_DEFAULTS_LIMIT", "25"),
];

#[derive(Debug, Deserialize)]
struct ChatQuery {
    #[serde(default)]
    prompt: String,
}

/// Forward a free-text prompt; failures become the response body
async fn chat_handler(State(state): State<AppState>, Query(query): Query<ChatQuery>) -> String {
    match state.chat_model.chat(&query.prompt).await {
        Ok(answer) => answer,
        Err(e) => {
            tracing::error!("Chat failed: {}", e);
            format!("{}{}", ERROR_PREFIX, e)
        }
    }
}

async fn prompt_handler(State(state): State<AppState>) -> Result<String, ServerError> {
    let prompt = load_prompt(
        RECIPE_TEMPLATE,
        &json!({
            "dishType": "oven dish",
            "ingredients": "potato, tomato, feta, olive oil"
        }),
    )?;
    info!(%prompt, "rendered template");
    Ok(state.chat_model.chat(&prompt).await?)
}

fn token_id(token: &str) -> String {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish().to_string()
}

// SSE data fields cannot carry carriage returns
fn sse_data(text: &str) -> String {
    text.replace('\r', "")
}

fn to_sse_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Partial(token) => Event::default()
            .event("chat-update")
            .id(token_id(&token))
            .data(sse_data(&token)),
        StreamEvent::Complete(response) => {
            info!(
                finish_reason = ?response.finish_reason,
                usage = ?response.usage,
                "stream complete"
            );
            Event::default()
                .event("chat-complete")
                .data(response.finish_reason.unwrap_or_else(|| "stop".to_string()))
        }
        StreamEvent::Error(message) => Event::default()
            .event("chat-error")
            .data(sse_data(&message)),
    }
}

/// Relay events until the first terminal one, which is always sent
pub(crate) fn event_stream(
    rx: mpsc::Receiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(event) => {
                let next = if event.is_terminal() { None } else { Some(rx) };
                Some((Ok(to_sse_event(event)), next))
            }
            None => Some((
                Ok(to_sse_event(StreamEvent::Error(
                    "Stream closed before completion".to_string(),
                ))),
                None,
            )),
        }
    })
}

async fn stream_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.streaming_model.stream_prompt(STREAM_PROMPT);
    Sse::new(event_stream(rx))
}

async fn mcp_handler(State(state): State<AppState>) -> Result<(), ServerError> {
    let system = McpSystem::connect(&state.settings.mcp.client_config()).await?;
    let mut agent = Agent::new(state.chat_model.clone()).with_system(Box::new(system));

    let result = agent.chat(MCP_QUESTION).await;
    // Dropping the agent closes the MCP session, whether or not the chat succeeded
    drop(agent);

    let answer = result?;
    info!(%answer, "mcp answer");
    Ok(())
}

async fn memory_handler(State(state): State<AppState>) -> Result<(), ServerError> {
    let mut memory = TokenWindowChatMemory::with_max_tokens(
        state.settings.memory.max_tokens,
        state.token_estimator.clone(),
    );
    memory.add(Message::system().with_text(MEMORY_SYSTEM));

    for question in [MEMORY_FIRST_QUESTION, MEMORY_SECOND_QUESTION] {
        memory.add(Message::user().with_text(question));
        let rx = state.streaming_model.stream(memory.messages());
        let answer = stream_to_message(rx, |token| debug!(token, "memory token")).await?;
        info!(question, answer = %answer.text(), "memory turn");
        memory.add(answer);
    }
    debug!(tokens = memory.token_count(), "memory window");
    Ok(())
}

async fn tool_handler(State(state): State<AppState>) -> Result<(), ServerError> {
    let mut agent = Agent::new(state.chat_model.clone())
        .with_system(Box::new(CalculatorSystem::new()))
        .with_memory(Box::new(MessageWindowChatMemory::with_max_messages(10)));

    let answer = agent.chat(TOOL_QUESTION).await?;
    info!(%answer, "tool answer");
    Ok(())
}

async fn msg_handler(State(state): State<AppState>) -> Result<(), ServerError> {
    let utils = TextUtils::new(state.chat_model.clone());

    let translation = utils.translate(TRANSLATE_TEXT, "italian").await?;
    info!(%translation, "translation");

    let bullets = utils.summarize(SUMMARY_TEXT, 3).await?;
    for bullet in &bullets {
        info!("- {}", bullet);
    }
    Ok(())
}

/// Ingest the bundled documents and build an agent that answers from them
async fn rag_agent(state: &AppState) -> Result<Agent, ServerError> {
    let settings = &state.settings.rag;
    let documents = FileSystemDocumentLoader::load_documents(&settings.documents_dir, &settings.glob)?;

    let store = Arc::new(InMemoryEmbeddingStore::new());
    EmbeddingStoreIngestor::new(state.embedding_model.clone(), store.clone())
        .ingest(&documents)
        .await?;
    let retriever = EmbeddingStoreContentRetriever::new(state.embedding_model.clone(), store);

    Ok(Agent::new(state.chat_model.clone())
        .with_memory(Box::new(MessageWindowChatMemory::with_max_messages(10)))
        .with_retriever(Arc::new(retriever)))
}

async fn rag_handler(State(state): State<AppState>) -> Result<(), ServerError> {
    let mut agent = rag_agent(&state).await?;
    let answer = agent.chat(RAG_QUESTION).await?;
    debug!(%answer, remembered = agent.messages().len(), "rag answer");
    Ok(())
}

async fn weaviate_handler(State(state): State<AppState>) -> Result<(), ServerError> {
    let settings = &state.settings.weaviate;
    let container = DockerContainer::start(&settings.image, WEAVIATE_PORT, &WEAVIATE_ENV).await?;

    let result = search_weaviate(&state, &container).await;
    // Remove the container whether or not the search succeeded
    if let Err(e) = container.stop().await {
        warn!("{}", e);
    }
    result
}

async fn search_weaviate(state: &AppState, container: &DockerContainer) -> Result<(), ServerError> {
    container
        .wait_until_ready(
            WEAVIATE_READY_PATH,
            Duration::from_secs(state.settings.weaviate.ready_timeout),
        )
        .await?;

    let store = WeaviateEmbeddingStore::builder()
        .scheme("http")
        .host(container.host_address())
        .object_class("Test")
        .avoid_dups(true)
        .consistency_level("ALL")
        .build()?;

    let texts: Vec<String> = WEAVIATE_SEGMENTS.iter().map(|s| s.to_string()).collect();
    let embeddings = state.embedding_model.embed_all(&texts).await?;
    store
        .add_all(
            embeddings,
            texts.into_iter().map(TextSegment::from_text).collect(),
        )
        .await?;

    let query = state.embedding_model.embed(WEAVIATE_QUERY).await?;
    let matches = store.search(&EmbeddingSearchRequest::new(query, 1)).await?;
    match matches.first() {
        Some(best) => info!(score = best.score, text = %best.segment.text, "weaviate match"),
        None => info!("weaviate returned no match"),
    }
    Ok(())
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", get(chat_handler))
        .route("/chat/prompt", get(prompt_handler))
        .route("/chat/stream", get(stream_handler))
        .route("/chat/mcp", get(mcp_handler))
        .route("/chat/memory", get(memory_handler))
        .route("/chat/tool", get(tool_handler))
        .route("/chat/msg", get(msg_handler))
        .route("/chat/rag", get(rag_handler))
        .route("/chat/weaviate", get(weaviate_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Settings;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use parley::providers::base::{ChatResponse, Usage};
    use serde_json::Value;
    use tower::ServiceExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(text: &str) -> Value {
        json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        })
    }

    fn sse_body(chunks: &[Value]) -> String {
        let mut body: String = chunks
            .iter()
            .map(|chunk| format!("data: {}\n\n", chunk))
            .collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn app(server: &MockServer, timeout: u64) -> Router {
        let mut settings = Settings::default();
        settings.ollama.base_url = server.uri();
        settings.ollama.timeout = timeout;
        crate::routes::configure(AppState::new(settings).unwrap())
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn mount_completion(server: &MockServer, text: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(text)))
            .mount(server)
            .await;
    }

    async fn mount_stream(server: &MockServer, tokens: &[&str]) {
        let mut chunks: Vec<Value> = tokens
            .iter()
            .map(|t| json!({"choices": [{"index": 0, "delta": {"content": t}}]}))
            .collect();
        chunks.push(json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]}));
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse_body(&chunks), "text/event-stream"),
            )
            .mount(server)
            .await;
    }

    fn event_names(body: &str) -> Vec<&str> {
        body.lines()
            .filter_map(|line| line.strip_prefix("event:"))
            .map(str::trim)
            .collect()
    }

    #[tokio::test]
    async fn test_chat_returns_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "model": "qwen3:0.6b",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("hi")))
            .mount(&server)
            .await;

        let (status, body) = get(app(&server, 5), "/chat/chat?prompt=hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hi");
    }

    #[tokio::test]
    async fn test_chat_timeout_is_reported_in_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("too late"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let (status, body) = get(app(&server, 1), "/chat/chat?prompt=hello").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(ERROR_PREFIX), "{}", body);
        assert!(body.contains("timed out"), "{}", body);
    }

    #[tokio::test]
    async fn test_prompt_renders_template() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [{
                    "role": "user",
                    "content": "Create a recipe for a oven dish with the following ingredients: potato, tomato, feta, olive oil"
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Bake it.")))
            .mount(&server)
            .await;

        let (status, body) = get(app(&server, 5), "/chat/chat/prompt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Bake it.");
    }

    #[tokio::test]
    async fn test_stream_updates_then_complete() {
        let server = MockServer::start().await;
        mount_stream(&server, &["Java ", "meets ", "AI"]).await;

        let (status, body) = get(app(&server, 5), "/chat/chat/stream").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            event_names(&body),
            vec!["chat-update", "chat-update", "chat-update", "chat-complete"]
        );
        assert!(body.contains("data: Java "));
        assert!(body.contains(&format!("id: {}", token_id("meets "))));
        assert!(body.contains("data: stop"));
    }

    #[tokio::test]
    async fn test_stream_error_is_single_terminal_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (status, body) = get(app(&server, 5), "/chat/chat/stream").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(event_names(&body), vec!["chat-error"]);
        assert!(body.contains("500"));
    }

    #[tokio::test]
    async fn test_event_stream_stops_after_terminal() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamEvent::Partial("a".into())).await.unwrap();
        tx.send(StreamEvent::Complete(ChatResponse {
            message: Message::assistant().with_text("a"),
            usage: Usage::default(),
            finish_reason: Some("length".into()),
        }))
        .await
        .unwrap();
        tx.send(StreamEvent::Partial("late".into())).await.unwrap();
        drop(tx);

        let events: Vec<_> = futures::StreamExt::collect(event_stream(rx)).await;
        assert_eq!(events.len(), 2);

        let (tx, rx) = mpsc::channel::<StreamEvent>(1);
        drop(tx);
        let events: Vec<_> = futures::StreamExt::collect(event_stream(rx)).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_runs_two_turns() {
        let server = MockServer::start().await;
        mount_stream(&server, &["Use ", "indexes."]).await;

        let (status, body) = get(app(&server, 5), "/chat/chat/memory").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
        let messages = second["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], MEMORY_FIRST_QUESTION);
        assert_eq!(messages[2]["content"], "Use indexes.");
        assert_eq!(messages[3]["content"], MEMORY_SECOND_QUESTION);
    }

    #[tokio::test]
    async fn test_tool_endpoint_runs_calculator() {
        let server = MockServer::start().await;
        // The first completion asks for a tool, the follow-up answers
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "calculator__string_length",
                                "arguments": "{\"s\": \"hello\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_completion(&server, "The answer is 3.16").await;

        let (status, _) = get(app(&server, 5), "/chat/chat/tool").await;
        assert_eq!(status, StatusCode::OK);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
        let last = second["messages"].as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["role"], "tool");
        assert_eq!(last["content"], "5");
    }

    #[tokio::test]
    async fn test_msg_endpoint() {
        let server = MockServer::start().await;
        mount_completion(&server, "- one\n- two\n- three").await;

        let (status, body) = get(app(&server, 5), "/chat/chat/msg").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mcp_unreachable_is_500() {
        let server = MockServer::start().await;
        let mut settings = Settings::default();
        settings.ollama.base_url = server.uri();
        settings.mcp.sse_url = format!("{}/sse", server.uri());
        settings.mcp.timeout = 2;
        let app = crate::routes::configure(AppState::new(settings).unwrap());

        let (status, body) = get(app, "/chat/chat/mcp").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("/sse"), "{}", body);
    }

    #[tokio::test]
    async fn test_rag_endpoint_augments_question() {
        let server = MockServer::start().await;
        // One embedding per input, whatever the batch size
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(|request: &wiremock::Request| {
                let body: Value = serde_json::from_slice(&request.body).unwrap();
                let inputs = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
                let embeddings: Vec<Vec<f32>> = (0..inputs).map(|_| vec![1.0, 0.0]).collect();
                ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
            })
            .mount(&server)
            .await;
        mount_completion(&server, "Yes, up to 24 hours before.").await;

        let documents = tempfile::tempdir().unwrap();
        std::fs::write(
            documents.path().join("terms.txt"),
            "Reservations can be cancelled free of charge up to 24 hours before pick-up.",
        )
        .unwrap();

        let mut settings = Settings::default();
        settings.ollama.base_url = server.uri();
        settings.rag.documents_dir = documents.path().to_path_buf();
        let app = crate::routes::configure(AppState::new(settings).unwrap());

        let (status, _) = get(app, "/chat/chat/rag").await;
        assert_eq!(status, StatusCode::OK);

        let requests = server.received_requests().await.unwrap();
        let chat = requests
            .iter()
            .find(|r| r.url.path() == "/v1/chat/completions")
            .unwrap();
        let body: Value = serde_json::from_slice(&chat.body).unwrap();
        let question = body["messages"][0]["content"].as_str().unwrap();
        assert!(question.starts_with(RAG_QUESTION));
        assert!(question.contains("Answer using the following information:"));
        assert!(question.contains("cancelled free of charge"));
    }

    #[tokio::test]
    async fn test_rag_agent_remembers_the_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(|request: &wiremock::Request| {
                let body: Value = serde_json::from_slice(&request.body).unwrap();
                let inputs = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
                let embeddings: Vec<Vec<f32>> = (0..inputs).map(|_| vec![0.0, 1.0]).collect();
                ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
            })
            .mount(&server)
            .await;
        mount_completion(&server, "Yes.").await;

        let documents = tempfile::tempdir().unwrap();
        std::fs::write(documents.path().join("terms.txt"), "Cancellation is free.").unwrap();

        let mut settings = Settings::default();
        settings.ollama.base_url = server.uri();
        settings.rag.documents_dir = documents.path().to_path_buf();
        let state = AppState::new(settings).unwrap();

        let mut agent = rag_agent(&state).await.unwrap();
        assert_eq!(agent.chat(RAG_QUESTION).await.unwrap(), "Yes.");
        agent.chat("And after that?").await.unwrap();

        // Both turns are kept, and the second request carries the first exchange
        assert_eq!(agent.messages().len(), 4);
        let requests = server.received_requests().await.unwrap();
        let last = requests
            .iter()
            .filter(|r| r.url.path() == "/v1/chat/completions")
            .last()
            .unwrap();
        let body: Value = serde_json::from_slice(&last.body).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert!(messages[0]["content"]
            .as_str()
            .unwrap()
            .starts_with(RAG_QUESTION));
        assert_eq!(messages[1]["content"], "Yes.");
    }

    #[tokio::test]
    async fn test_rag_missing_documents_is_500() {
        let server = MockServer::start().await;
        let mut settings = Settings::default();
        settings.ollama.base_url = server.uri();
        settings.rag.documents_dir = "/definitely/not/here".into();
        let app = crate::routes::configure(AppState::new(settings).unwrap());

        let (status, body) = get(app, "/chat/chat/rag").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("Directory not found"));
    }
}
