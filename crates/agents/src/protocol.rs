//! NDJSON frames exchanged with the agent worker over stdio.

use serde::{Deserialize, Serialize};

use clawdis_common::types::{MediaPayload, ThinkingLevel};

/// Host → worker request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    Run(RunRequest),
    #[serde(rename_all = "camelCase")]
    Cancel { run_id: String },
}

/// One agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub run_id: String,
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Prefix prepended to the body (abort reminders, group primers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_prefix: Option<String>,
    pub body: String,
    pub thinking: ThinkingLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaPayload>,
    pub model_ref: String,
    pub timeout_ms: u64,
}

/// Worker → host event line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// May omit `session_id`; only Claude-class backends guarantee one.
    #[serde(rename_all = "camelCase")]
    SessionStart {
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolStart {
        run_id: String,
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arg: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolEnd {
        run_id: String,
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preview: Option<String>,
    },
    /// Incremental text; may arrive many times.
    #[serde(rename_all = "camelCase")]
    Text { run_id: String, delta: String },
    #[serde(rename_all = "camelCase")]
    Final {
        run_id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        run_id: String,
        message: String,
        kind: String,
    },
    /// Resolves the run even when `final` was the last payload seen.
    #[serde(rename_all = "camelCase")]
    AgentEnd { run_id: String },
}

impl WorkerEvent {
    #[must_use]
    pub fn run_id(&self) -> &str {
        match self {
            Self::SessionStart { run_id, .. }
            | Self::ToolStart { run_id, .. }
            | Self::ToolEnd { run_id, .. }
            | Self::Text { run_id, .. }
            | Self::Final { run_id, .. }
            | Self::Error { run_id, .. }
            | Self::AgentEnd { run_id } => run_id,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_used: Option<u64>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_wire_shape() {
        let req = WorkerRequest::Run(RunRequest {
            run_id: "r1".into(),
            session_key: "agent:main:main".into(),
            session_id: Some("s1".into()),
            system_prompt: None,
            body_prefix: None,
            body: "hi".into(),
            thinking: ThinkingLevel::High,
            media: vec![],
            model_ref: "anthropic/claude-sonnet-4-5".into(),
            timeout_ms: 120_000,
        });
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.contains("\"type\":\"run\""));
        assert!(line.contains("\"runId\":\"r1\""));
        assert!(line.contains("\"sessionKey\""));
        assert!(line.contains("\"modelRef\""));
    }

    #[test]
    fn events_parse_by_type_tag() {
        let ev: WorkerEvent =
            serde_json::from_str(r#"{"type":"text","runId":"r1","delta":"hel"}"#).unwrap();
        assert!(matches!(ev, WorkerEvent::Text { ref delta, .. } if delta == "hel"));

        let ev: WorkerEvent =
            serde_json::from_str(r#"{"type":"session_start","runId":"r1"}"#).unwrap();
        assert!(matches!(ev, WorkerEvent::SessionStart { session_id: None, .. }));

        let ev: WorkerEvent = serde_json::from_str(
            r#"{"type":"final","runId":"r1","text":"done","usage":{"contextUsed":1234}}"#,
        )
        .unwrap();
        match ev {
            WorkerEvent::Final { usage, .. } => {
                assert_eq!(usage.unwrap().context_used, Some(1234));
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn run_id_accessor_covers_all_variants() {
        let ev: WorkerEvent = serde_json::from_str(r#"{"type":"agent_end","runId":"r9"}"#).unwrap();
        assert_eq!(ev.run_id(), "r9");
    }
}
