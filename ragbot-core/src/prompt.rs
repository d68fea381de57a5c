use crate::models::{ChatMessage, Sender};

const DEFAULT_TEMPLATE: &str = "\
You are the assistant of a personal blog. Answer the visitor's question using \
only the context below. If the context does not contain the answer, say so \
politely instead of guessing. Answer in the language of the question.

# Context
{context}

# Conversation so far
{chat_history}

# Question
{question}
";

/// Prompt template with `{context}`, `{chat_history}` and `{question}` placeholders.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Read the template from `path`, or use the built-in one when `path` is `None`.
    pub fn load(path: Option<&str>) -> std::io::Result<Self> {
        match path {
            Some(p) => Ok(Self::new(std::fs::read_to_string(p)?)),
            None => Ok(Self::default()),
        }
    }

    pub fn render(&self, context: &[String], history: &[ChatMessage], question: &str) -> String {
        let context = if context.is_empty() {
            "(no relevant context found)".to_string()
        } else {
            context.join("\n")
        };

        // Single pass so that placeholder-like text inside user input is left alone.
        let mut out = String::with_capacity(self.template.len() + context.len() + question.len());
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            if let Some(stripped) = tail.strip_prefix("{context}") {
                out.push_str(&context);
                rest = stripped;
            } else if let Some(stripped) = tail.strip_prefix("{chat_history}") {
                out.push_str(&format_history(history));
                rest = stripped;
            } else if let Some(stripped) = tail.strip_prefix("{question}") {
                out.push_str(question);
                rest = stripped;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

fn format_history(history: &[ChatMessage]) -> String {
    if history.is_empty() {
        return "(none)".to_string();
    }
    history
        .iter()
        .map(|m| {
            let speaker = match m.sender {
                Sender::User => "User",
                Sender::Bot => "Assistant",
            };
            format!("{}: {}", speaker, m.message)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
