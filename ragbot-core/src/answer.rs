use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::generation::LanguageModel;
use crate::models::ChatMessage;
use crate::prompt::PromptTemplate;
use crate::retrieval::Retriever;

/// Produces an answer for a question given the session's recent transcript.
/// One call, one response; failures are returned to the caller untouched.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn answer(&self, question: &str, history: &[ChatMessage]) -> Result<String>;
}

/// Retrieve context, render the prompt, ask the model.
pub struct RagAnswerGenerator {
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn LanguageModel>,
    prompt: PromptTemplate,
}

impl RagAnswerGenerator {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn LanguageModel>,
        prompt: PromptTemplate,
    ) -> Self {
        Self {
            retriever,
            model,
            prompt,
        }
    }
}

#[async_trait]
impl AnswerGenerator for RagAnswerGenerator {
    async fn answer(&self, question: &str, history: &[ChatMessage]) -> Result<String> {
        let context = self.retriever.retrieve(question).await?;
        let prompt = self.prompt.render(&context, history, question);

        tracing::debug!(
            model = self.model.name(),
            context_chunks = context.len(),
            history = history.len(),
            prompt_chars = prompt.len(),
            "Generating answer"
        );

        let answer = self.model.complete(&prompt).await?;
        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagbotError;
    use crate::generation::GenerationError;
    use crate::models::Sender;
    use chrono::Utc;
    use tokio::sync::Mutex;

    struct FixedRetriever(Vec<String>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn retrieve(&self, _query: &str) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn complete(&self, prompt: &str) -> std::result::Result<String, GenerationError> {
            self.prompts.lock().await.push(prompt.to_string());
            if self.fail {
                return Err(GenerationError::Api {
                    code: 500,
                    message: "boom".to_string(),
                });
            }
            Ok("  Jaesik lives in Seoul.\n".to_string())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_answer_feeds_context_history_and_question_to_model() {
        let model = Arc::new(RecordingModel::default());
        let generator = RagAnswerGenerator::new(
            Arc::new(FixedRetriever(vec!["Q: home?\nA: Seoul".to_string()])),
            model.clone(),
            PromptTemplate::new("{context}|{chat_history}|{question}"),
        );
        let history = vec![ChatMessage {
            id: 1,
            session_id: "s1".to_string(),
            sender: Sender::User,
            message: "hello".to_string(),
            created_at: Utc::now(),
        }];

        let answer = generator.answer("Where does he live?", &history).await.unwrap();
        assert_eq!(answer, "Jaesik lives in Seoul.");

        let prompts = model.prompts.lock().await;
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0], "Q: home?\nA: Seoul|User: hello|Where does he live?");
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let generator = RagAnswerGenerator::new(
            Arc::new(FixedRetriever(vec![])),
            Arc::new(RecordingModel {
                fail: true,
                ..Default::default()
            }),
            PromptTemplate::default(),
        );

        let err = generator.answer("q", &[]).await.unwrap_err();
        assert!(matches!(err, RagbotError::Generation(_)));
    }
}
