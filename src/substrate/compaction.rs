use crate::provider::{InferenceParams, InvokeRequest, ProviderError};
use crate::provider::ModelProvider;
use crate::schemas::Message;
use crate::spec::CompactionConfig;

/// Summarizes the oldest portion of a conversation when it grows past a
/// token threshold, keeping the most recent messages verbatim.
///
/// Safe to call before every turn: when `enabled` is false or the
/// estimated token count is under `when_tokens_over`, [`CompactionHook::maybe_compact`]
/// is a no-op, so callers don't need to track whether compaction already
/// ran this turn (§4.4 "idempotent and safe to invoke before every turn").
pub struct CompactionHook {
    config: CompactionConfig,
}

impl CompactionHook {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Runs compaction against `history` in place if `estimated_tokens`
    /// exceeds `when_tokens_over`. `summarizer` is the model client bound
    /// to `summarization_model` (or the agent's own model, if none is
    /// configured) — resolving which model that is is the run driver's
    /// job, this hook only knows how to use whichever client it's given.
    pub async fn maybe_compact(
        &self,
        history: &mut Vec<Message>,
        estimated_tokens: u64,
        summarizer: &dyn ModelProvider,
    ) -> Result<bool, ProviderError> {
        if !self.config.enabled || estimated_tokens <= self.config.when_tokens_over {
            return Ok(false);
        }
        if history.len() <= self.config.preserve_recent_messages {
            return Ok(false);
        }

        let keep_from = history
            .len()
            .saturating_sub(self.config.preserve_recent_messages);
        let split_at = ((history.len() as f64) * self.config.summary_ratio).round() as usize;
        let split_at = split_at.min(keep_from).max(0);

        if split_at == 0 {
            return Ok(false);
        }

        let to_summarize = &history[..split_at];
        let transcript: String = to_summarize
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        let request = InvokeRequest {
            messages: vec![Message::system(
                "Summarize the following conversation history concisely, preserving facts and decisions relevant to continuing the task.",
            ), Message::human(transcript)],
            tool_names: Vec::new(),
            inference: InferenceParams::default(),
        };

        let response = summarizer.invoke(request).await?;
        let summary = Message::system(format!("[compacted summary] {}", response.response_text));

        let tail = history.split_off(split_at);
        *history = vec![summary];
        history.extend(tail);

        log::debug!(
            "compacted {} of {} history messages into one summary",
            split_at,
            split_at + tail_len(history)
        );
        Ok(true)
    }
}

fn tail_len(history: &[Message]) -> usize {
    history.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockProvider, MockResponse};

    fn history_of(n: usize) -> Vec<Message> {
        (0..n).map(|i| Message::human(format!("msg {i}"))).collect()
    }

    #[tokio::test]
    async fn skips_when_disabled() {
        let hook = CompactionHook::new(CompactionConfig {
            enabled: false,
            when_tokens_over: 10,
            summary_ratio: 0.5,
            preserve_recent_messages: 2,
            summarization_model: None,
        });
        let mut history = history_of(10);
        let summarizer = MockProvider::script(vec![MockResponse::text("summary")]);
        let compacted = hook.maybe_compact(&mut history, 9999, &summarizer).await.unwrap();
        assert!(!compacted);
        assert_eq!(history.len(), 10);
    }

    #[tokio::test]
    async fn skips_when_under_threshold() {
        let hook = CompactionHook::new(CompactionConfig {
            enabled: true,
            when_tokens_over: 10_000,
            summary_ratio: 0.5,
            preserve_recent_messages: 2,
            summarization_model: None,
        });
        let mut history = history_of(10);
        let summarizer = MockProvider::script(vec![MockResponse::text("summary")]);
        let compacted = hook.maybe_compact(&mut history, 10, &summarizer).await.unwrap();
        assert!(!compacted);
    }

    #[tokio::test]
    async fn compacts_oldest_portion_preserving_recent() {
        let hook = CompactionHook::new(CompactionConfig {
            enabled: true,
            when_tokens_over: 10,
            summary_ratio: 0.5,
            preserve_recent_messages: 2,
            summarization_model: None,
        });
        let mut history = history_of(10);
        let summarizer = MockProvider::script(vec![MockResponse::text("recap")]);
        let compacted = hook.maybe_compact(&mut history, 999, &summarizer).await.unwrap();
        assert!(compacted);
        assert_eq!(history.len(), 6);
        assert!(history[0].content.contains("recap"));
        assert_eq!(history[5].content, "msg 9");
    }
}
