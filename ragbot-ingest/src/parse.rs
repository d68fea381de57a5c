//! Source text → knowledge chunks.
//!
//! Three input shapes are understood:
//! - `qa`: free text where each question starts on a line with `Q.` (optionally
//!   bolded as `**Q.**`) and the answer runs until the next question
//! - `paragraphs`: blank-line separated prose, one chunk per paragraph
//! - `json`: an array of `{"question": .., "answer": ..}` objects

use std::str::FromStr;

use ragbot_core::models::NewChunk;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

impl QaPair {
    pub fn to_chunk_text(&self) -> String {
        format!("Q: {}\nA: {}", self.question, self.answer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Qa,
    Paragraphs,
    Json,
}

impl FromStr for InputFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qa" => Ok(InputFormat::Qa),
            "paragraphs" => Ok(InputFormat::Paragraphs),
            "json" => Ok(InputFormat::Json),
            other => Err(IngestError::UnknownFormat(other.to_string())),
        }
    }
}

/// Extract question/answer pairs. Pairs whose question or answer ends up empty
/// are dropped.
pub fn parse_qa(text: &str) -> Result<Vec<QaPair>, IngestError> {
    let question_re = Regex::new(r"(?m)^[ \t]*(?:\*\*)?Q\.(?:\*\*)?[ \t]*(.+)$")?;
    let answer_marker_re = Regex::new(r"(?m)^[ \t]*(?:\*\*)?A\.(?:\*\*)?[ \t]*")?;

    let matches: Vec<_> = question_re.captures_iter(text).collect();
    let mut pairs = Vec::with_capacity(matches.len());

    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(question)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());

        let question = question.as_str().trim().trim_end_matches("**").trim();
        let answer_raw = text[whole.end()..end].trim();
        let answer = answer_marker_re.replace_all(answer_raw, "");
        let answer = answer.trim();

        if question.is_empty() || answer.is_empty() {
            tracing::debug!(question = %question, "Skipping incomplete Q&A pair");
            continue;
        }
        pairs.push(QaPair {
            question: question.to_string(),
            answer: answer.to_string(),
        });
    }

    Ok(pairs)
}

/// Blank-line separated paragraphs, trimmed, empties removed.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn load_qa_json(text: &str) -> Result<Vec<QaPair>, IngestError> {
    let pairs: Vec<QaPair> = serde_json::from_str(text)?;
    Ok(pairs
        .into_iter()
        .filter(|p| !p.question.trim().is_empty() && !p.answer.trim().is_empty())
        .collect())
}

/// Parse `text` in the given format and number the chunks from 0.
pub fn build_chunks(
    format: InputFormat,
    text: &str,
    source: &str,
) -> Result<Vec<NewChunk>, IngestError> {
    let contents: Vec<String> = match format {
        InputFormat::Qa => parse_qa(text)?.iter().map(QaPair::to_chunk_text).collect(),
        InputFormat::Json => load_qa_json(text)?
            .iter()
            .map(QaPair::to_chunk_text)
            .collect(),
        InputFormat::Paragraphs => split_paragraphs(text),
    };

    Ok(contents
        .into_iter()
        .enumerate()
        .map(|(i, content)| NewChunk {
            content,
            source: source.to_string(),
            chunk_index: i as i32,
        })
        .collect())
}
