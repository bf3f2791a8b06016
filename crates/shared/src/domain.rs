use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(ExamId);
id_newtype!(AttemptId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Mcq,
    Boolean,
    Code,
}

/// One exam question as served by the remote generator. Grading material
/// never reaches the client; `test_case_input` and `test_case_output` are
/// display-only context for code questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Immutable once fetched. Question order is both the presentation order and
/// the answer-indexing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamDefinition {
    pub id: ExamId,
    pub topic: String,
    pub difficulty: String,
    pub questions: Vec<Question>,
}

/// Graded outcome returned by the remote service. The client treats this as
/// opaque and never fabricates a score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamResult {
    pub score: u32,
    pub total: u32,
    pub passed: bool,
    pub xp_earned: u32,
}
