use dashmap::DashMap;

/// Process-local question counts keyed by session identifier.
///
/// Counts are never persisted: after a restart every session is absent until
/// it registers again, so `can_ask` is false for it even if the durable
/// `active` flag is still true.
#[derive(Debug)]
pub struct UsageCounter {
    counts: DashMap<String, u32>,
    max_questions: u32,
}

impl UsageCounter {
    pub fn new(max_questions: u32) -> Self {
        Self {
            counts: DashMap::new(),
            max_questions,
        }
    }

    pub fn max_questions(&self) -> u32 {
        self.max_questions
    }

    pub fn reset(&self, session_id: &str) {
        self.counts.insert(session_id.to_string(), 0);
    }

    pub fn can_ask(&self, session_id: &str) -> bool {
        self.counts
            .get(session_id)
            .map(|count| *count < self.max_questions)
            .unwrap_or(false)
    }

    /// Increment the count of a known session and return the new value.
    /// Unknown sessions are left alone and yield `None`.
    pub fn record(&self, session_id: &str) -> Option<u32> {
        let mut count = self.counts.get_mut(session_id)?;
        *count += 1;
        Some(*count)
    }

    pub fn count(&self, session_id: &str) -> u32 {
        self.counts.get(session_id).map(|c| *c).unwrap_or(0)
    }

    pub fn is_exhausted(&self, count: u32) -> bool {
        count >= self.max_questions
    }
}
