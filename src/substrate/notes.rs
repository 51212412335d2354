use tokio::sync::Mutex;

/// One structured record of a single agent invocation, appended to the
/// run's journal. Serialization to Markdown or JSON for presentation is
/// an output-layer concern (§4.5); this hook only accumulates the fixed
/// semantic record shape.
#[derive(Debug, Clone)]
pub struct JournalRecord {
    pub step_ref: String,
    pub agent_id: String,
    pub input_digest: String,
    pub output_digest: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
}

fn digest(text: &str, max_len: usize) -> String {
    let truncated: String = text.chars().take(max_len).collect();
    if text.chars().count() > max_len {
        format!("{truncated}…")
    } else {
        truncated
    }
}

/// Append-only journal of [`JournalRecord`]s for one run. Attached to an
/// agent at build time and detached (simply dropped, since it owns no
/// external resource) at teardown.
#[derive(Default)]
pub struct NotesHook {
    records: Mutex<Vec<JournalRecord>>,
}

impl NotesHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(
        &self,
        step_ref: impl Into<String>,
        agent_id: impl Into<String>,
        input: &str,
        output: &str,
        tokens_input: u64,
        tokens_output: u64,
    ) {
        let record = JournalRecord {
            step_ref: step_ref.into(),
            agent_id: agent_id.into(),
            input_digest: digest(input, 120),
            output_digest: digest(output, 120),
            tokens_input,
            tokens_output,
        };
        self.records.lock().await.push(record);
    }

    pub async fn records(&self) -> Vec<JournalRecord> {
        self.records.lock().await.clone()
    }
}
