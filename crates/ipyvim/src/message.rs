//! Closed message types decoded from kernel traffic.
//!
//! The iopub channel yields [`Notification`]s and the shell channel yields
//! [`Reply`]s. Both can be decoded from typed `jupyter_protocol` messages
//! (live connections) or from raw JSON content (message dumps, older kernels).
//! Decoding never fails: a missing field becomes empty text or a zero count.

use std::collections::HashMap;

use jupyter_protocol::{
    ExpressionResult, JupyterMessage, JupyterMessageContent, Media, MediaType, Payload, Stdio,
};
use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// One asynchronous message from the kernel's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Stream {
        name: StreamName,
        text: String,
    },
    ExecuteResult {
        count: usize,
        text: String,
    },
    DisplayData {
        text: String,
    },
    ExecuteInput {
        count: usize,
        code: String,
    },
    Error {
        traceback: Vec<String>,
        name: String,
        value: String,
    },
    Status,
    Other {
        msg_type: String,
    },
}

impl Notification {
    pub fn stdout(text: impl Into<String>) -> Self {
        Notification::Stream {
            name: StreamName::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Notification::Stream {
            name: StreamName::Stderr,
            text: text.into(),
        }
    }

    /// Decode a typed message read from the iopub channel.
    pub fn from_message(message: &JupyterMessage) -> Self {
        match &message.content {
            JupyterMessageContent::StreamContent(stream) => Notification::Stream {
                name: match stream.name {
                    Stdio::Stdout => StreamName::Stdout,
                    Stdio::Stderr => StreamName::Stderr,
                },
                text: stream.text.clone(),
            },
            JupyterMessageContent::ExecuteResult(result) => Notification::ExecuteResult {
                count: result.execution_count.0 as usize,
                text: plain_text(&result.data),
            },
            JupyterMessageContent::DisplayData(data) => Notification::DisplayData {
                text: plain_text(&data.data),
            },
            JupyterMessageContent::UpdateDisplayData(data) => Notification::DisplayData {
                text: plain_text(&data.data),
            },
            JupyterMessageContent::ExecuteInput(input) => Notification::ExecuteInput {
                count: input.execution_count.0 as usize,
                code: input.code.clone(),
            },
            JupyterMessageContent::ErrorOutput(error) => Notification::Error {
                traceback: error.traceback.clone(),
                name: error.ename.clone(),
                value: error.evalue.clone(),
            },
            JupyterMessageContent::Status(_) => Notification::Status,
            _ => Notification::Other {
                msg_type: message.header.msg_type.clone(),
            },
        }
    }

    /// Decode raw message content by message type.
    ///
    /// Accepts the pre-5.0 IPython names (`pyout`, `pyin`, `pyerr`) and the
    /// old `data` key on stream messages.
    pub fn from_json(msg_type: &str, content: &Value) -> Self {
        match msg_type {
            "status" => Notification::Status,
            "stream" => {
                let name = match content.get("name").and_then(Value::as_str) {
                    Some("stderr") => StreamName::Stderr,
                    _ => StreamName::Stdout,
                };
                let text = content
                    .get("text")
                    .or_else(|| content.get("data"))
                    .map(text_value)
                    .unwrap_or_else(|| missing(msg_type, "text"));
                Notification::Stream { name, text }
            }
            "execute_result" | "pyout" => Notification::ExecuteResult {
                count: count_field(msg_type, content),
                text: data_text(msg_type, content),
            },
            "display_data" | "update_display_data" => Notification::DisplayData {
                text: data_text(msg_type, content),
            },
            "execute_input" | "pyin" => Notification::ExecuteInput {
                count: count_field(msg_type, content),
                code: str_field(msg_type, content, "code"),
            },
            "error" | "pyerr" => {
                let traceback = content
                    .get("traceback")
                    .and_then(Value::as_array)
                    .map(|lines| lines.iter().map(text_value).collect())
                    .unwrap_or_else(|| missing(msg_type, "traceback"));
                Notification::Error {
                    traceback,
                    name: str_field(msg_type, content, "ename"),
                    value: str_field(msg_type, content, "evalue"),
                }
            }
            other => Notification::Other {
                msg_type: other.to_string(),
            },
        }
    }
}

/// A reply read from the shell channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Execute {
        execution_count: usize,
        /// `text/plain` of every page payload (`?` / `??` help)
        pages: Vec<String>,
        /// `text/plain` of each successfully evaluated user expression
        user_expressions: HashMap<String, String>,
    },
    Complete {
        matches: Vec<String>,
    },
    Other {
        msg_type: String,
    },
}

impl Reply {
    pub fn from_message(message: &JupyterMessage) -> Self {
        match &message.content {
            JupyterMessageContent::ExecuteReply(reply) => Reply::Execute {
                execution_count: reply.execution_count.0 as usize,
                pages: reply
                    .payload
                    .iter()
                    .filter_map(|payload| match payload {
                        Payload::Page { data, .. } => Some(plain_text(data)),
                        _ => None,
                    })
                    .collect(),
                user_expressions: reply
                    .user_expressions
                    .as_ref()
                    .map(|expressions| {
                        expressions
                            .iter()
                            .filter_map(|(name, result)| match result {
                                ExpressionResult::Ok { data, .. } => {
                                    Some((name.clone(), plain_text(data)))
                                }
                                ExpressionResult::Error { .. } => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            JupyterMessageContent::CompleteReply(reply) => Reply::Complete {
                matches: reply.matches.clone(),
            },
            _ => Reply::Other {
                msg_type: message.header.msg_type.clone(),
            },
        }
    }
}

/// The `text/plain` entry of a MIME bundle, or empty.
pub fn plain_text(media: &Media) -> String {
    media
        .content
        .iter()
        .find_map(|media_type| match media_type {
            MediaType::Plain(text) => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn missing<T: Default>(msg_type: &str, field: &'static str) -> T {
    debug!(
        "[message] {}",
        SessionError::MalformedMessage {
            msg_type: msg_type.to_string(),
            field,
        }
    );
    T::default()
}

/// Strings pass through, nbformat-style line arrays are concatenated.
fn text_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts.iter().filter_map(Value::as_str).collect(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn str_field(msg_type: &str, content: &Value, field: &'static str) -> String {
    content
        .get(field)
        .map(text_value)
        .unwrap_or_else(|| missing(msg_type, field))
}

fn count_field(msg_type: &str, content: &Value) -> usize {
    content
        .get("execution_count")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or_else(|| missing(msg_type, "execution_count"))
}

fn data_text(msg_type: &str, content: &Value) -> String {
    content
        .get("data")
        .and_then(|data| data.get("text/plain"))
        .map(text_value)
        .unwrap_or_else(|| missing(msg_type, "data.text/plain"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jupyter_protocol::{
        CompleteReply, ErrorOutput, ExecuteInput, ExecuteReply, ExecuteResult, ExecutionCount,
        KernelInfoRequest, StreamContent,
    };
    use serde_json::json;

    fn message(content: impl Into<JupyterMessageContent>) -> JupyterMessage {
        JupyterMessage::new(content, None)
    }

    #[test]
    fn test_stream_from_json() {
        let n = Notification::from_json("stream", &json!({"name": "stdout", "text": "hi\n"}));
        assert_eq!(n, Notification::stdout("hi\n"));

        let n = Notification::from_json("stream", &json!({"name": "stderr", "data": "oops"}));
        assert_eq!(n, Notification::stderr("oops"));
    }

    #[test]
    fn test_execute_result_from_json() {
        let n = Notification::from_json(
            "execute_result",
            &json!({"execution_count": 3, "data": {"text/plain": "5"}, "metadata": {}}),
        );
        assert_eq!(
            n,
            Notification::ExecuteResult {
                count: 3,
                text: "5".into()
            }
        );
    }

    #[test]
    fn test_legacy_names() {
        let n = Notification::from_json("pyin", &json!({"code": "1+1", "execution_count": 7}));
        assert_eq!(
            n,
            Notification::ExecuteInput {
                count: 7,
                code: "1+1".into()
            }
        );
        let n = Notification::from_json(
            "pyerr",
            &json!({"ename": "E", "evalue": "v", "traceback": ["a", "b"]}),
        );
        assert_eq!(
            n,
            Notification::Error {
                traceback: vec!["a".into(), "b".into()],
                name: "E".into(),
                value: "v".into()
            }
        );
    }

    #[test]
    fn test_malformed_content_decodes_to_empty_fields() {
        assert_eq!(
            Notification::from_json("execute_result", &json!({})),
            Notification::ExecuteResult {
                count: 0,
                text: String::new()
            }
        );
        assert_eq!(
            Notification::from_json("error", &json!({"ename": "KeyError"})),
            Notification::Error {
                traceback: vec![],
                name: "KeyError".into(),
                value: String::new()
            }
        );
        assert_eq!(
            Notification::from_json("stream", &json!(null)),
            Notification::stdout("")
        );
    }

    #[test]
    fn test_multiline_plain_text_array() {
        let n = Notification::from_json(
            "display_data",
            &json!({"data": {"text/plain": ["a\n", "b"]}}),
        );
        assert_eq!(n, Notification::DisplayData { text: "a\nb".into() });
    }

    #[test]
    fn test_unknown_type() {
        let n = Notification::from_json("comm_open", &json!({"comm_id": "x"}));
        assert_eq!(
            n,
            Notification::Other {
                msg_type: "comm_open".into()
            }
        );
    }

    #[test]
    fn test_typed_iopub_messages() {
        assert_eq!(
            Notification::from_message(&message(StreamContent::stderr("boom\n"))),
            Notification::stderr("boom\n")
        );
        assert_eq!(
            Notification::from_message(&message(ExecuteInput {
                code: "1 + 1".into(),
                execution_count: ExecutionCount::new(9),
            })),
            Notification::ExecuteInput {
                count: 9,
                code: "1 + 1".into()
            }
        );
        assert_eq!(
            Notification::from_message(&message(ErrorOutput {
                ename: "NameError".into(),
                evalue: "name 'y' is not defined".into(),
                traceback: vec!["\x1b[31mNameError\x1b[0m".into()],
            })),
            Notification::Error {
                traceback: vec!["\x1b[31mNameError\x1b[0m".into()],
                name: "NameError".into(),
                value: "name 'y' is not defined".into()
            }
        );
        assert_eq!(
            Notification::from_message(&message(KernelInfoRequest::default())),
            Notification::Other {
                msg_type: "kernel_info_request".into()
            }
        );
    }

    #[test]
    fn test_typed_execute_result_prefers_plain_text() {
        let bundle = Media::new(vec![
            MediaType::Html("<b>2</b>".into()),
            MediaType::Plain("2".into()),
        ]);
        assert_eq!(
            Notification::from_message(&message(ExecuteResult::new(ExecutionCount::new(4), bundle))),
            Notification::ExecuteResult {
                count: 4,
                text: "2".into()
            }
        );

        // A bundle without text/plain decodes to empty text
        let html_only = Media::new(vec![MediaType::Html("<b>2</b>".into())]);
        assert_eq!(
            Notification::from_message(&message(ExecuteResult::new(
                ExecutionCount::new(5),
                html_only
            ))),
            Notification::ExecuteResult {
                count: 5,
                text: String::new()
            }
        );
    }

    #[test]
    fn test_typed_execute_reply_pages_and_expressions() {
        let mut expressions = HashMap::new();
        expressions.insert(
            "_pid".to_string(),
            ExpressionResult::Ok {
                data: Media::new(vec![MediaType::Plain("4242".into())]),
                metadata: Default::default(),
            },
        );
        expressions.insert(
            "broken".to_string(),
            ExpressionResult::Error {
                ename: "NameError".into(),
                evalue: "broken".into(),
                traceback: vec![],
            },
        );
        let reply = ExecuteReply {
            execution_count: ExecutionCount::new(5),
            payload: vec![Payload::Page {
                data: Media::new(vec![MediaType::Plain("Docstring: hi".into())]),
                start: 0,
            }],
            user_expressions: Some(expressions),
            ..ExecuteReply::default()
        };

        let mut expected = HashMap::new();
        expected.insert("_pid".to_string(), "4242".to_string());
        assert_eq!(
            Reply::from_message(&message(reply)),
            Reply::Execute {
                execution_count: 5,
                pages: vec!["Docstring: hi".into()],
                user_expressions: expected,
            }
        );

        assert_eq!(
            Reply::from_message(&message(ExecuteReply::default())),
            Reply::Execute {
                execution_count: 0,
                pages: vec![],
                user_expressions: HashMap::new(),
            }
        );
    }

    #[test]
    fn test_typed_complete_reply() {
        let reply = CompleteReply {
            matches: vec!["print".into(), "private_var".into()],
            cursor_start: 0,
            cursor_end: 3,
            ..CompleteReply::default()
        };
        assert_eq!(
            Reply::from_message(&message(reply)),
            Reply::Complete {
                matches: vec!["print".into(), "private_var".into()]
            }
        );
        assert_eq!(
            Reply::from_message(&message(KernelInfoRequest::default())),
            Reply::Other {
                msg_type: "kernel_info_request".into()
            }
        );
    }
}
