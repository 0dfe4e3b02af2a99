//! Analysis transcripts persisted next to the agent artifacts of a request.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::conversation::Conversation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptOutcome {
    Success,
    TurnsExhausted,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptMeta {
    pub template: String,
    pub agent: String,
    pub source_path: String,
    pub max_turns: u32,
    pub turns_used: u32,
    pub model_calls: u32,
    pub outcome: TranscriptOutcome,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct TranscriptPaths {
    pub meta_path: PathBuf,
    pub conversation_path: PathBuf,
}

impl TranscriptPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            meta_path: dir.join("meta.json"),
            conversation_path: dir.join("transcript.json"),
        }
    }
}

pub fn write_transcript(
    dir: &Path,
    meta: &TranscriptMeta,
    conversation: &Conversation,
) -> Result<TranscriptPaths> {
    let paths = TranscriptPaths::new(dir);
    fs::create_dir_all(dir).with_context(|| format!("create transcript dir {}", dir.display()))?;
    write_json(&paths.meta_path, meta)?;
    write_json(&paths.conversation_path, conversation)?;
    Ok(paths)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Message;
    use serde_json::Value;

    #[test]
    fn writes_meta_and_conversation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut conversation = Conversation::seeded("sys", "user");
        conversation.push(Message::assistant("{}"));
        let meta = TranscriptMeta {
            template: "architecture-vision".to_string(),
            agent: "project-scanner".to_string(),
            source_path: "/repo".to_string(),
            max_turns: 4,
            turns_used: 0,
            model_calls: 1,
            outcome: TranscriptOutcome::Success,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        };

        let paths = write_transcript(temp.path(), &meta, &conversation).expect("write");

        let stored: Value =
            serde_json::from_str(&fs::read_to_string(&paths.conversation_path).expect("read"))
                .expect("parse");
        assert_eq!(stored.as_array().map(Vec::len), Some(3));
        assert_eq!(stored[2]["role"], "assistant");
        let meta_raw = fs::read_to_string(&paths.meta_path).expect("read");
        assert!(meta_raw.contains("\"outcome\": \"success\""));
    }
}
