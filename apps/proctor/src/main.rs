use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use exam_core::{
    ExamService, ExamSessionController, HeadlessFullscreenHost, HttpExamService, SessionEvent,
};
use shared::{
    domain::{AttemptId, ExamId},
    protocol::GenerateExamRequest,
};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: String,
    /// Bearer token issued by the platform login.
    #[arg(long)]
    token: Option<String>,
    /// List past attempts and exit.
    #[arg(long)]
    history: bool,
    /// Print the per-question review of a graded attempt and exit.
    #[arg(long)]
    review: Option<i64>,
    /// Generate a fresh exam on this topic and exit.
    #[arg(long)]
    generate_topic: Option<String>,
    #[arg(long, default_value = "medium")]
    difficulty: String,
    #[arg(long, default_value_t = 5)]
    count: u32,
    /// Run a proctored attempt against this exam.
    #[arg(long)]
    exam_id: Option<i64>,
    /// JSON object mapping question index to answer, e.g. {"0": "a", "2": "true"}.
    #[arg(long)]
    answers_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut service = HttpExamService::new(args.server_url);
    if let Some(token) = args.token {
        service = service.with_bearer_token(token);
    }
    let service = Arc::new(service);

    if args.history {
        return print_history(&service).await;
    }
    if let Some(attempt_id) = args.review {
        return print_review(&service, AttemptId(attempt_id)).await;
    }
    if let Some(topic) = args.generate_topic {
        let generated = service
            .generate_exam(&GenerateExamRequest {
                topic_name: topic,
                difficulty: args.difficulty,
                count: args.count,
            })
            .await?;
        println!(
            "Generated exam {} on {} [{}]",
            generated.id.0, generated.topic_name, generated.difficulty
        );
        return Ok(());
    }

    let Some(exam_id) = args.exam_id else {
        bail!("nothing to do: pass --exam-id, --generate-topic, --history, or --review");
    };
    let answers = match &args.answers_file {
        Some(path) => read_answers(path)?,
        None => BTreeMap::new(),
    };
    run_attempt(service, ExamId(exam_id), answers).await
}

async fn print_history(service: &Arc<HttpExamService>) -> Result<()> {
    for attempt in service.exam_history().await? {
        println!(
            "attempt {} | {} [{}] | {}/{} {} | +{} xp | {}",
            attempt.id.0,
            attempt.topic,
            attempt.difficulty,
            attempt.score,
            attempt.total,
            if attempt.passed { "passed" } else { "failed" },
            attempt.xp,
            attempt.date,
        );
    }
    Ok(())
}

async fn print_review(service: &Arc<HttpExamService>, attempt_id: AttemptId) -> Result<()> {
    let review = service.attempt_review(attempt_id).await?;
    println!(
        "attempt {} on exam {} | {} [{}] | {}/{} {}",
        review.id.0,
        review.exam_id.0,
        review.topic,
        review.difficulty,
        review.score,
        review.total,
        if review.passed { "passed" } else { "failed" },
    );
    for (index, entry) in review.review_data.iter().enumerate() {
        let mark = if entry.is_correct { "ok" } else { "x" };
        println!("[{mark}] q{index}: {}", entry.question);
        println!(
            "     answered {:?}, correct {:?}",
            entry.user_answer, entry.correct_answer
        );
        println!("     {}", entry.explanation);
    }
    Ok(())
}

fn read_answers(path: &PathBuf) -> Result<BTreeMap<usize, String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading answers file {}", path.display()))?;
    let parsed: BTreeMap<String, String> = serde_json::from_str(&raw)
        .context("answers file must be a JSON object mapping question index to answer")?;
    parsed
        .into_iter()
        .map(|(index, answer)| {
            let index = index
                .parse()
                .with_context(|| format!("bad question index {index:?}"))?;
            Ok((index, answer))
        })
        .collect()
}

async fn run_attempt(
    service: Arc<HttpExamService>,
    exam_id: ExamId,
    answers: BTreeMap<usize, String>,
) -> Result<()> {
    let host = Arc::new(HeadlessFullscreenHost::new());
    let controller = ExamSessionController::new(service, host);
    let mut events = controller.subscribe_events();

    controller.load(exam_id).await?;
    let exam = controller
        .exam()
        .await
        .context("exam definition missing after load")?;
    println!(
        "Loaded exam {}: {} [{}], {} questions, {} seconds",
        exam.id.0,
        exam.topic,
        exam.difficulty,
        exam.questions.len(),
        controller.remaining_seconds().await,
    );

    controller.start().await?;
    for (index, answer) in &answers {
        controller.go_to(*index).await?;
        controller.select_answer(answer.clone()).await?;
    }

    if answers.is_empty() {
        println!("No answers file supplied; the attempt submits when the clock runs out.");
    } else {
        println!("Submitting {} answers.", answers.len());
        controller.submit().await?;
    }

    let mut clock = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = clock.tick() => controller.tick().await,
            event = events.recv() => match event? {
                SessionEvent::Tick { remaining_seconds } if remaining_seconds % 30 == 0 => {
                    println!("{remaining_seconds} seconds remaining");
                }
                SessionEvent::Completed { result } => {
                    println!(
                        "Result: {}/{} {} (+{} xp)",
                        result.score,
                        result.total,
                        if result.passed { "passed" } else { "failed" },
                        result.xp_earned,
                    );
                    return Ok(());
                }
                SessionEvent::SubmitFailed(detail) => bail!("submission failed: {detail}"),
                _ => {}
            },
        }
    }
}
