//! HTTP implementation of [`ExamService`] against the remote mock-exam API.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use shared::{
    domain::{AttemptId, ExamDefinition, ExamId, ExamResult},
    error::ApiErrorBody,
    protocol::{AttemptReview, AttemptSummary, GenerateExamRequest, GeneratedExam, SubmittedAnswer},
};

use crate::{
    error::{LoadError, SubmitError},
    ExamService,
};

pub struct HttpExamService {
    http: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpExamService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
            bearer_token: None,
        }
    }

    /// Authentication is owned by the remote API; the client only forwards
    /// the issued token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.get(format!("{}{path}", self.base_url)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.http.post(format!("{}{path}", self.base_url)))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl ExamService for HttpExamService {
    async fn fetch_exam(&self, exam_id: ExamId) -> Result<ExamDefinition, LoadError> {
        let response = self
            .get(&format!("/mock-exam/{}", exam_id.0))
            .send()
            .await
            .map_err(|err| LoadError::Network(err.into()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LoadError::NotFound(exam_id));
        }

        response
            .error_for_status()
            .map_err(|err| LoadError::Network(err.into()))?
            .json()
            .await
            .map_err(|err| LoadError::Network(err.into()))
    }

    async fn submit_exam(
        &self,
        exam_id: ExamId,
        answers: &[SubmittedAnswer],
    ) -> Result<ExamResult, SubmitError> {
        let response = self
            .post(&format!("/mock-exam/{}/submit", exam_id.0))
            .json(&answers)
            .send()
            .await
            .map_err(|err| SubmitError::Network(err.into()))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let detail = match response.json::<ApiErrorBody>().await {
                Ok(body) => body.detail,
                Err(_) => status.to_string(),
            };
            return Err(SubmitError::ServerRejected(format!("{status}: {detail}")));
        }

        response
            .json()
            .await
            .map_err(|err| SubmitError::Network(err.into()))
    }

    async fn generate_exam(&self, request: &GenerateExamRequest) -> Result<GeneratedExam> {
        let generated = self
            .post("/mock-exam/generate")
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(generated)
    }

    async fn exam_history(&self) -> Result<Vec<AttemptSummary>> {
        let history = self
            .get("/mock-exam/history")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(history)
    }

    async fn attempt_review(&self, attempt_id: AttemptId) -> Result<AttemptReview> {
        let review = self
            .get(&format!("/mock-exam/attempt/{}", attempt_id.0))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(review)
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
