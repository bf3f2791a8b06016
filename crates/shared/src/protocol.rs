use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AttemptId, ExamId, QuestionKind};

/// One entry of the submit payload. The body of a submission is an ordered
/// list of these, ascending by `question_index`, containing only the
/// questions that were actually answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_index: u32,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateExamRequest {
    pub topic_name: String,
    pub difficulty: String,
    pub count: u32,
}

/// Echo of a freshly generated exam row. The service also returns the stored
/// question payload, but the client only needs the id to begin an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedExam {
    pub id: ExamId,
    pub topic_name: String,
    pub difficulty: String,
}

/// One row of the attempt history listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub id: AttemptId,
    pub topic: String,
    pub difficulty: String,
    pub score: u32,
    pub total: u32,
    pub passed: bool,
    pub date: DateTime<Utc>,
    pub xp: u32,
}

/// Per-question review data for a graded attempt. `correct_answer` is only
/// disclosed here, after grading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    pub is_correct: bool,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReview {
    pub id: AttemptId,
    pub exam_id: ExamId,
    pub topic: String,
    pub difficulty: String,
    pub score: u32,
    pub total: u32,
    pub passed: bool,
    pub date: DateTime<Utc>,
    pub review_data: Vec<ReviewEntry>,
}
