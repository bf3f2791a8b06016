use super::*;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode as HttpStatus},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::{Question, QuestionKind},
    error::ApiErrorBody,
    protocol::ReviewEntry,
};
use tokio::{net::TcpListener, sync::Mutex};

fn served_exam() -> ExamDefinition {
    ExamDefinition {
        id: ExamId(42),
        topic: "Lifetimes".into(),
        difficulty: "hard".into(),
        questions: vec![
            Question {
                kind: QuestionKind::Mcq,
                question: "Which borrow outlives the other?".into(),
                options: Some(vec!["a".into(), "b".into(), "c".into(), "d".into()]),
                test_case_input: None,
                test_case_output: None,
                explanation: None,
            },
            Question {
                kind: QuestionKind::Boolean,
                question: "A shared reference permits mutation.".into(),
                options: None,
                test_case_input: None,
                test_case_output: None,
                explanation: None,
            },
        ],
    }
}

fn graded_result() -> ExamResult {
    ExamResult {
        score: 1,
        total: 2,
        passed: false,
        xp_earned: 10,
    }
}

#[derive(Clone)]
struct MockExamServer {
    exam: ExamDefinition,
    submissions: Arc<Mutex<Vec<Vec<SubmittedAnswer>>>>,
    generate_requests: Arc<Mutex<Vec<GenerateExamRequest>>>,
    seen_auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    reject_submits_with: Arc<Mutex<Option<HttpStatus>>>,
}

impl MockExamServer {
    fn new() -> Self {
        Self {
            exam: served_exam(),
            submissions: Arc::new(Mutex::new(Vec::new())),
            generate_requests: Arc::new(Mutex::new(Vec::new())),
            seen_auth_headers: Arc::new(Mutex::new(Vec::new())),
            reject_submits_with: Arc::new(Mutex::new(None)),
        }
    }
}

async fn record_auth(state: &MockExamServer, headers: &HeaderMap) {
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.seen_auth_headers.lock().await.push(header);
}

async fn handle_fetch_exam(
    State(state): State<MockExamServer>,
    Path(exam_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    record_auth(&state, &headers).await;
    if exam_id != state.exam.id.0 {
        return HttpStatus::NOT_FOUND.into_response();
    }
    Json(state.exam.clone()).into_response()
}

async fn handle_submit(
    State(state): State<MockExamServer>,
    Path(_exam_id): Path<i64>,
    Json(answers): Json<Vec<SubmittedAnswer>>,
) -> Response {
    state.submissions.lock().await.push(answers);
    if let Some(status) = *state.reject_submits_with.lock().await {
        return (status, Json(ApiErrorBody::new("attempt already graded"))).into_response();
    }
    Json(graded_result()).into_response()
}

async fn handle_generate(
    State(state): State<MockExamServer>,
    Json(request): Json<GenerateExamRequest>,
) -> Json<GeneratedExam> {
    let generated = GeneratedExam {
        id: ExamId(42),
        topic_name: request.topic_name.clone(),
        difficulty: request.difficulty.clone(),
    };
    state.generate_requests.lock().await.push(request);
    Json(generated)
}

async fn handle_history(State(state): State<MockExamServer>) -> Json<Vec<AttemptSummary>> {
    Json(vec![AttemptSummary {
        id: AttemptId(5),
        topic: state.exam.topic.clone(),
        difficulty: state.exam.difficulty.clone(),
        score: 1,
        total: 2,
        passed: false,
        date: "2026-08-01T12:00:00Z".parse().expect("timestamp"),
        xp: 10,
    }])
}

async fn handle_review(
    State(state): State<MockExamServer>,
    Path(attempt_id): Path<i64>,
) -> Json<AttemptReview> {
    Json(AttemptReview {
        id: AttemptId(attempt_id),
        exam_id: state.exam.id,
        topic: state.exam.topic.clone(),
        difficulty: state.exam.difficulty.clone(),
        score: 1,
        total: 2,
        passed: false,
        date: "2026-08-01T12:00:00Z".parse().expect("timestamp"),
        review_data: vec![ReviewEntry {
            question: state.exam.questions[0].question.clone(),
            options: state.exam.questions[0].options.clone(),
            kind: QuestionKind::Mcq,
            user_answer: Some("b".into()),
            correct_answer: Some("a".into()),
            is_correct: false,
            explanation: "a is the longer-lived borrow".into(),
        }],
    })
}

async fn spawn_mock_exam_server(state: MockExamServer) -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/mock-exam/generate", post(handle_generate))
        .route("/mock-exam/history", get(handle_history))
        .route("/mock-exam/attempt/:attempt_id", get(handle_review))
        .route("/mock-exam/:exam_id", get(handle_fetch_exam))
        .route("/mock-exam/:exam_id/submit", post(handle_submit))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

#[tokio::test]
async fn fetch_exam_decodes_definition() {
    let state = MockExamServer::new();
    let url = spawn_mock_exam_server(state.clone()).await.expect("spawn server");
    let service = HttpExamService::new(url);

    let exam = service.fetch_exam(ExamId(42)).await.expect("fetch");
    assert_eq!(exam.id, ExamId(42));
    assert_eq!(exam.questions.len(), 2);
    assert_eq!(exam.questions[1].kind, QuestionKind::Boolean);

    // No token configured, so no Authorization header goes out.
    assert_eq!(*state.seen_auth_headers.lock().await, vec![None]);
}

#[tokio::test]
async fn fetch_exam_maps_missing_exam_to_not_found() {
    let state = MockExamServer::new();
    let url = spawn_mock_exam_server(state).await.expect("spawn server");
    let service = HttpExamService::new(url);

    let err = service.fetch_exam(ExamId(999)).await.expect_err("must fail");
    assert!(matches!(err, LoadError::NotFound(ExamId(999))));
}

#[tokio::test]
async fn fetch_exam_forwards_bearer_token() {
    let state = MockExamServer::new();
    let url = spawn_mock_exam_server(state.clone()).await.expect("spawn server");
    let service = HttpExamService::new(url).with_bearer_token("session-token");

    service.fetch_exam(ExamId(42)).await.expect("fetch");

    assert_eq!(
        *state.seen_auth_headers.lock().await,
        vec![Some("Bearer session-token".to_string())]
    );
}

#[tokio::test]
async fn submit_exam_posts_indexed_answer_list() {
    let state = MockExamServer::new();
    let url = spawn_mock_exam_server(state.clone()).await.expect("spawn server");
    let service = HttpExamService::new(url);

    let answers = vec![
        SubmittedAnswer {
            question_index: 0,
            answer: "a".into(),
        },
        SubmittedAnswer {
            question_index: 1,
            answer: "false".into(),
        },
    ];
    let result = service
        .submit_exam(ExamId(42), &answers)
        .await
        .expect("submit");

    assert_eq!(result, graded_result());
    assert_eq!(*state.submissions.lock().await, vec![answers]);
}

#[tokio::test]
async fn submit_rejection_carries_status_and_detail() {
    let state = MockExamServer::new();
    *state.reject_submits_with.lock().await = Some(HttpStatus::CONFLICT);
    let url = spawn_mock_exam_server(state.clone()).await.expect("spawn server");
    let service = HttpExamService::new(url);

    let answers = [SubmittedAnswer {
        question_index: 0,
        answer: "a".into(),
    }];
    let err = service
        .submit_exam(ExamId(42), &answers)
        .await
        .expect_err("must fail");

    match err {
        SubmitError::ServerRejected(detail) => {
            assert!(detail.contains("409"), "unexpected detail: {detail}");
            assert!(detail.contains("attempt already graded"));
        }
        other => panic!("expected ServerRejected, got {other:?}"),
    }

    *state.reject_submits_with.lock().await = Some(HttpStatus::INTERNAL_SERVER_ERROR);
    let err = service
        .submit_exam(ExamId(42), &answers)
        .await
        .expect_err("must fail");
    assert!(matches!(err, SubmitError::ServerRejected(detail) if detail.contains("500")));
}

#[tokio::test]
async fn unreachable_server_maps_to_network_errors() {
    // Bind and immediately drop to get an address nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let service = HttpExamService::new(format!("http://{addr}"));

    let err = service.fetch_exam(ExamId(42)).await.expect_err("must fail");
    assert!(matches!(err, LoadError::Network(_)));

    let err = service
        .submit_exam(ExamId(42), &[])
        .await
        .expect_err("must fail");
    assert!(matches!(err, SubmitError::Network(_)));
}

#[tokio::test]
async fn generate_posts_request_and_returns_new_exam_id() {
    let state = MockExamServer::new();
    let url = spawn_mock_exam_server(state.clone()).await.expect("spawn server");
    let service = HttpExamService::new(url);

    let generated = service
        .generate_exam(&GenerateExamRequest {
            topic_name: "Lifetimes".into(),
            difficulty: "hard".into(),
            count: 5,
        })
        .await
        .expect("generate");

    assert_eq!(generated.id, ExamId(42));
    assert_eq!(generated.topic_name, "Lifetimes");

    let requests = state.generate_requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].count, 5);
}

#[tokio::test]
async fn history_and_review_decode_attempt_records() {
    let state = MockExamServer::new();
    let url = spawn_mock_exam_server(state).await.expect("spawn server");
    let service = HttpExamService::new(url);

    let history = service.exam_history().await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, AttemptId(5));
    assert_eq!(history[0].topic, "Lifetimes");
    assert!(!history[0].passed);

    let review = service.attempt_review(AttemptId(5)).await.expect("review");
    assert_eq!(review.exam_id, ExamId(42));
    assert_eq!(review.review_data.len(), 1);
    assert_eq!(review.review_data[0].correct_answer.as_deref(), Some("a"));
    assert!(!review.review_data[0].is_correct);
}
