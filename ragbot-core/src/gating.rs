//! Gating pipeline: registration, activation and bounded questioning.
//!
//! Per session identifier:
//!
//! ```text
//! UNREGISTERED --register--> ACTIVE(0)
//! ACTIVE(n), n < max --ask--> ACTIVE(n + 1)     both messages persisted
//! ACTIVE(max - 1)    --ask--> INACTIVE(max)     both messages persisted, then deactivated
//! INACTIVE           --ask--> INACTIVE          refusal, nothing persisted
//! any                --register--> ACTIVE(0)
//! ```
//!
//! `register` and `ask` hold a per-session lock for their whole duration, so
//! concurrent requests on one session are serialised and cannot overrun the
//! quota. Different sessions never contend.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::answer::AnswerGenerator;
use crate::config::GatingConfig;
use crate::error::{RagbotError, Result};
use crate::models::{ChatMessage, Sender, UserProfile};
use crate::store::SessionStore;
use crate::usage::UsageCounter;

pub const INACTIVE_REFUSAL: &str =
    "This chat session is not active. Please register to start a new conversation.";

pub const QUOTA_REFUSAL: &str =
    "You have reached the maximum number of questions for this session. Thank you for chatting!";

/// Result of a question that did not fail. Refusals are normal outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    Answered(String),
    Inactive,
    QuotaReached,
}

impl AskOutcome {
    pub fn is_answered(&self) -> bool {
        matches!(self, AskOutcome::Answered(_))
    }

    /// Text shown to the user: the answer or the canned refusal.
    pub fn into_text(self) -> String {
        match self {
            AskOutcome::Answered(answer) => answer,
            AskOutcome::Inactive => INACTIVE_REFUSAL.to_string(),
            AskOutcome::QuotaReached => QUOTA_REFUSAL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatingOptions {
    pub max_questions: u32,
    pub answer_timeout: Duration,
    pub history_messages: u32,
}

impl From<&GatingConfig> for GatingOptions {
    fn from(config: &GatingConfig) -> Self {
        Self {
            max_questions: config.max_questions,
            answer_timeout: Duration::from_secs(config.answer_timeout_seconds),
            history_messages: config.history_messages,
        }
    }
}

pub struct GatingPipeline {
    store: Arc<dyn SessionStore>,
    generator: Arc<dyn AnswerGenerator>,
    counter: UsageCounter,
    locks: DashMap<String, Arc<Mutex<()>>>,
    answer_timeout: Duration,
    history_messages: u32,
}

impl GatingPipeline {
    pub fn new(
        store: Arc<dyn SessionStore>,
        generator: Arc<dyn AnswerGenerator>,
        options: GatingOptions,
    ) -> Self {
        Self {
            store,
            generator,
            counter: UsageCounter::new(options.max_questions),
            locks: DashMap::new(),
            answer_timeout: options.answer_timeout,
            history_messages: options.history_messages,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn max_questions(&self) -> u32 {
        self.counter.max_questions()
    }

    /// Lock one session for the duration of the returned guard. The map entry is
    /// dropped again once no other task holds or waits on it, so refused or
    /// abandoned requests leave nothing behind.
    async fn lock_session(&self, session_id: &str) -> SessionGuard<'_> {
        let lock = Arc::clone(&self.locks.entry(session_id.to_string()).or_default());
        SessionGuard {
            locks: &self.locks,
            session_id: session_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Sessions currently holding a lock entry.
    pub fn locked_sessions(&self) -> usize {
        self.locks.len()
    }

    /// Register (or re-register) a session: upsert profile, activate, reset the quota.
    pub async fn register(&self, profile: &UserProfile) -> Result<()> {
        let _guard = self.lock_session(&profile.session_id).await;

        self.store.register(profile).await?;
        self.counter.reset(&profile.session_id);

        tracing::info!(
            session_id = %profile.session_id,
            max_questions = self.counter.max_questions(),
            "Session registered"
        );
        Ok(())
    }

    pub async fn is_active(&self, session_id: &str) -> Result<bool> {
        self.store.is_active(session_id).await
    }

    pub fn can_ask(&self, session_id: &str) -> bool {
        self.counter.can_ask(session_id)
    }

    pub fn question_count(&self, session_id: &str) -> u32 {
        self.counter.count(session_id)
    }

    pub async fn save_message(
        &self,
        session_id: &str,
        sender: Sender,
        body: &str,
    ) -> Result<ChatMessage> {
        self.store.append_message(session_id, sender, body).await
    }

    /// Count one answered question; deactivates the session durably when the
    /// quota is reached. Returns the new count (0 for unknown sessions).
    pub async fn record_question(&self, session_id: &str) -> Result<u32> {
        let count = match self.counter.record(session_id) {
            Some(count) => count,
            None => return Ok(0),
        };

        if self.counter.is_exhausted(count) {
            self.store.deactivate(session_id).await?;
            tracing::info!(session_id = %session_id, count, "Question quota reached, session deactivated");
        }
        Ok(count)
    }

    pub async fn ask(&self, session_id: &str, question: &str) -> Result<AskOutcome> {
        let _guard = self.lock_session(session_id).await;

        if !self.store.is_active(session_id).await? {
            // A session closed by its own quota gets the quota text; anything
            // else (never registered, closed before a restart) the inactive one.
            let outcome = if self.counter.is_exhausted(self.counter.count(session_id)) {
                AskOutcome::QuotaReached
            } else {
                AskOutcome::Inactive
            };
            tracing::info!(session_id = %session_id, ?outcome, "Question refused: session inactive");
            return Ok(outcome);
        }

        if !self.counter.can_ask(session_id) {
            tracing::warn!(
                session_id = %session_id,
                count = self.counter.count(session_id),
                "Question refused: quota exhausted while session still active"
            );
            return Ok(AskOutcome::QuotaReached);
        }

        let history = self
            .store
            .recent_messages(session_id, self.history_messages)
            .await?;

        // The question was asked: it stays in the transcript even if generation fails.
        self.save_message(session_id, Sender::User, question).await?;

        let answer = tokio::time::timeout(
            self.answer_timeout,
            self.generator.answer(question, &history),
        )
        .await
        .map_err(|_| RagbotError::Timeout {
            seconds: self.answer_timeout.as_secs(),
        })??;

        self.save_message(session_id, Sender::Bot, &answer).await?;
        let count = self.record_question(session_id).await?;

        tracing::info!(
            session_id = %session_id,
            count,
            max_questions = self.counter.max_questions(),
            "Question answered"
        );
        Ok(AskOutcome::Answered(answer))
    }
}

struct SessionGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        // release the mutex (and its Arc) before checking who else holds it
        self.guard.take();
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the question and remembers how much history it was given.
    #[derive(Default)]
    struct EchoGenerator {
        calls: AtomicUsize,
        last_history_len: AtomicUsize,
    }

    #[async_trait]
    impl AnswerGenerator for EchoGenerator {
        async fn answer(&self, question: &str, history: &[ChatMessage]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_history_len.store(history.len(), Ordering::SeqCst);
            Ok(format!("echo: {}", question))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl AnswerGenerator for FailingGenerator {
        async fn answer(&self, _question: &str, _history: &[ChatMessage]) -> Result<String> {
            Err(RagbotError::Generation(
                crate::generation::GenerationError::EmptyResponse {
                    reason: "SAFETY".to_string(),
                },
            ))
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl AnswerGenerator for SlowGenerator {
        async fn answer(&self, _question: &str, _history: &[ChatMessage]) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    fn options(max_questions: u32) -> GatingOptions {
        GatingOptions {
            max_questions,
            answer_timeout: Duration::from_secs(5),
            history_messages: 10,
        }
    }

    fn profile(session_id: &str) -> UserProfile {
        UserProfile {
            session_id: session_id.to_string(),
            name: "Jaesik".to_string(),
            job: "Data scientist".to_string(),
            company: "Blog".to_string(),
            country: "Korea".to_string(),
        }
    }

    fn pipeline_with(
        generator: Arc<dyn AnswerGenerator>,
        opts: GatingOptions,
    ) -> (GatingPipeline, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let pipeline = GatingPipeline::new(store.clone(), generator, opts);
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_register_starts_active_with_zero_count() {
        let (pipeline, _) = pipeline_with(Arc::new(EchoGenerator::default()), options(5));
        pipeline.register(&profile("s1")).await.unwrap();

        assert_eq!(pipeline.question_count("s1"), 0);
        assert!(pipeline.is_active("s1").await.unwrap());
        assert!(pipeline.can_ask("s1"));
    }

    #[tokio::test]
    async fn test_five_questions_then_quota_refusal() {
        let generator = Arc::new(EchoGenerator::default());
        let (pipeline, store) = pipeline_with(generator.clone(), options(5));
        pipeline.register(&profile("s1")).await.unwrap();
        assert!(pipeline.can_ask("s1"));

        for i in 1..=4 {
            let outcome = pipeline.ask("s1", "hello").await.unwrap();
            assert_eq!(outcome, AskOutcome::Answered("echo: hello".to_string()));
            assert_eq!(pipeline.question_count("s1"), i);
        }
        assert!(pipeline.is_active("s1").await.unwrap());

        let fifth = pipeline.ask("s1", "hello").await.unwrap();
        assert!(fifth.is_answered());
        assert_eq!(pipeline.question_count("s1"), 5);
        assert!(!pipeline.is_active("s1").await.unwrap());

        let rows_before = store.message_count("s1").await.unwrap();
        let sixth = pipeline.ask("s1", "hello").await.unwrap();
        assert_eq!(sixth, AskOutcome::QuotaReached);
        assert_eq!(sixth.into_text(), QUOTA_REFUSAL);
        assert_eq!(pipeline.question_count("s1"), 5);
        assert_eq!(store.message_count("s1").await.unwrap(), rows_before);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_unknown_session_gets_inactive_refusal_and_no_rows() {
        let generator = Arc::new(EchoGenerator::default());
        let (pipeline, store) = pipeline_with(generator.clone(), options(5));

        let outcome = pipeline.ask("unknown_session", "hi").await.unwrap();
        assert_eq!(outcome.into_text(), INACTIVE_REFUSAL);
        assert_eq!(store.message_count("unknown_session").await.unwrap(), 0);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_each_answer_writes_user_then_bot_row() {
        let (pipeline, store) = pipeline_with(Arc::new(EchoGenerator::default()), options(5));
        pipeline.register(&profile("s1")).await.unwrap();

        pipeline.ask("s1", "first").await.unwrap();
        pipeline.ask("s1", "second").await.unwrap();

        let transcript = store.transcript("s1").await;
        let rows: Vec<(Sender, &str)> = transcript
            .iter()
            .map(|m| (m.sender, m.message.as_str()))
            .collect();
        assert_eq!(
            rows,
            vec![
                (Sender::User, "first"),
                (Sender::Bot, "echo: first"),
                (Sender::User, "second"),
                (Sender::Bot, "echo: second"),
            ]
        );
    }

    #[tokio::test]
    async fn test_history_excludes_current_question() {
        let generator = Arc::new(EchoGenerator::default());
        let (pipeline, _) = pipeline_with(generator.clone(), options(5));
        pipeline.register(&profile("s1")).await.unwrap();

        pipeline.ask("s1", "one").await.unwrap();
        assert_eq!(generator.last_history_len.load(Ordering::SeqCst), 0);

        pipeline.ask("s1", "two").await.unwrap();
        assert_eq!(generator.last_history_len.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reregistration_resets_quota_and_activation() {
        let (pipeline, _) = pipeline_with(Arc::new(EchoGenerator::default()), options(2));
        pipeline.register(&profile("s1")).await.unwrap();
        pipeline.ask("s1", "a").await.unwrap();
        pipeline.ask("s1", "b").await.unwrap();
        assert!(!pipeline.is_active("s1").await.unwrap());

        pipeline.register(&profile("s1")).await.unwrap();
        assert_eq!(pipeline.question_count("s1"), 0);
        assert!(pipeline.is_active("s1").await.unwrap());
        assert!(pipeline.ask("s1", "c").await.unwrap().is_answered());
    }

    #[tokio::test]
    async fn test_active_session_without_counter_gets_quota_refusal() {
        // Simulates a restart: the durable flag survived, the in-memory count did not.
        let store = Arc::new(MemorySessionStore::new());
        store.register(&profile("s1")).await.unwrap();
        let pipeline = GatingPipeline::new(
            store.clone(),
            Arc::new(EchoGenerator::default()),
            options(5),
        );

        let outcome = pipeline.ask("s1", "still there?").await.unwrap();
        assert_eq!(outcome, AskOutcome::QuotaReached);
        assert_eq!(outcome.into_text(), QUOTA_REFUSAL);
        assert_eq!(store.message_count("s1").await.unwrap(), 0);
        assert!(pipeline.is_active("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_generator_failure_keeps_question_and_does_not_count() {
        let (pipeline, store) = pipeline_with(Arc::new(FailingGenerator), options(5));
        pipeline.register(&profile("s1")).await.unwrap();

        let err = pipeline.ask("s1", "will fail").await.unwrap_err();
        assert!(matches!(err, RagbotError::Generation(_)));

        let transcript = store.transcript("s1").await;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].sender, Sender::User);
        assert_eq!(pipeline.question_count("s1"), 0);
        assert!(pipeline.is_active("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_slow_generator_times_out() {
        let opts = GatingOptions {
            answer_timeout: Duration::from_millis(50),
            ..options(5)
        };
        let (pipeline, store) = pipeline_with(Arc::new(SlowGenerator), opts);
        pipeline.register(&profile("s1")).await.unwrap();

        let err = pipeline.ask("s1", "slow?").await.unwrap_err();
        assert!(matches!(err, RagbotError::Timeout { .. }));
        assert_eq!(store.message_count("s1").await.unwrap(), 1);
        assert_eq!(pipeline.question_count("s1"), 0);
    }

    #[tokio::test]
    async fn test_record_question_on_unknown_session_is_noop() {
        let (pipeline, store) = pipeline_with(Arc::new(EchoGenerator::default()), options(1));
        assert_eq!(pipeline.record_question("ghost").await.unwrap(), 0);
        assert!(store.state("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_asks_never_exceed_quota() {
        let generator = Arc::new(EchoGenerator::default());
        let (pipeline, store) = pipeline_with(generator.clone(), options(5));
        let pipeline = Arc::new(pipeline);
        pipeline.register(&profile("s1")).await.unwrap();

        let tasks: Vec<_> = (0..12)
            .map(|i| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move { pipeline.ask("s1", &format!("q{}", i)).await })
            })
            .collect();

        let outcomes: Vec<AskOutcome> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let answered = outcomes.iter().filter(|o| o.is_answered()).count();
        assert_eq!(answered, 5);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 5);
        assert_eq!(pipeline.question_count("s1"), 5);
        assert_eq!(store.message_count("s1").await.unwrap(), 10);
        assert!(!pipeline.is_active("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_refused_asks_leave_no_lock_entries() {
        let (pipeline, _) = pipeline_with(Arc::new(EchoGenerator::default()), options(1));
        for i in 0..1000 {
            let outcome = pipeline.ask(&format!("unknown-{}", i), "hi").await.unwrap();
            assert_eq!(outcome, AskOutcome::Inactive);
        }
        assert_eq!(pipeline.locked_sessions(), 0);

        pipeline.register(&profile("s1")).await.unwrap();
        pipeline.ask("s1", "one").await.unwrap();
        pipeline.ask("s1", "two").await.unwrap();
        assert_eq!(pipeline.locked_sessions(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_ask_keeps_question_and_releases_session() {
        let (pipeline, store) = pipeline_with(Arc::new(SlowGenerator), options(5));
        pipeline.register(&profile("s1")).await.unwrap();

        // caller gives up while the answer is still being generated
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), pipeline.ask("s1", "anyone?")).await;
        assert!(abandoned.is_err());

        let transcript = store.transcript("s1").await;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].sender, Sender::User);
        assert_eq!(pipeline.question_count("s1"), 0);
        assert!(pipeline.is_active("s1").await.unwrap());
        assert_eq!(pipeline.locked_sessions(), 0);

        // the session lock was released: a later request gets through
        tokio::time::timeout(Duration::from_secs(1), pipeline.register(&profile("s1")))
            .await
            .expect("session lock was not released")
            .unwrap();
        assert_eq!(store.message_count("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_ask_does_not_block_next_ask() {
        let generator = Arc::new(EchoGenerator::default());
        let (pipeline, store) = pipeline_with(generator.clone(), options(5));
        let pipeline = Arc::new(pipeline);
        pipeline.register(&profile("s1")).await.unwrap();

        // hold the session lock so the first ask parks inside `ask`, then drop it
        let held = pipeline.lock_session("s1").await;
        let parked = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.ask("s1", "never sent").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        parked.abort();
        assert!(parked.await.unwrap_err().is_cancelled());
        drop(held);

        let outcome = tokio::time::timeout(Duration::from_secs(1), pipeline.ask("s1", "next"))
            .await
            .expect("session lock was not released")
            .unwrap();
        assert_eq!(outcome, AskOutcome::Answered("echo: next".to_string()));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.message_count("s1").await.unwrap(), 2);
        assert_eq!(pipeline.locked_sessions(), 0);
    }
}
