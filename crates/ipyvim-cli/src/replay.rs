//! Render a recorded message dump the way the editor log would show it.
//!
//! The dump is JSON lines of `{"ch": "iopub", "msg": {"header": {"msg_type":
//! ...}, "content": {...}}}`. Lines from other channels are skipped.

use std::io::BufRead;

use anyhow::Result;
use ipyvim::{Config, MessageRenderer, Notification, ScratchBuffer};
use log::warn;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct DumpLine {
    ch: String,
    msg: DumpMessage,
}

#[derive(Debug, Deserialize)]
struct DumpMessage {
    header: DumpHeader,
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Deserialize)]
struct DumpHeader {
    msg_type: String,
}

/// Decode the iopub messages of a dump, skipping lines that do not parse.
pub fn read_notifications<R: BufRead>(input: R) -> Result<Vec<Notification>> {
    let mut notifications = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DumpLine>(&line) {
            Ok(entry) if entry.ch == "iopub" => notifications.push(Notification::from_json(
                &entry.msg.header.msg_type,
                &entry.msg.content,
            )),
            Ok(_) => {}
            Err(e) => warn!("[replay] Skipping line {}: {}", index + 1, e),
        }
    }
    Ok(notifications)
}

/// The log lines a dump renders to.
pub fn render_dump<R: BufRead>(input: R, config: &Config) -> Result<Vec<String>> {
    let notifications = read_notifications(input)?;
    let mut renderer = MessageRenderer::new(config);
    let mut log = ScratchBuffer::visible();
    renderer.render_into(&notifications, &mut log, false);
    Ok(log.lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"
{"ch": "shell", "msg": {"header": {"msg_type": "execute_reply"}, "content": {"status": "ok"}}}
{"ch": "iopub", "msg": {"header": {"msg_type": "status"}, "content": {"execution_state": "busy"}}}
{"ch": "iopub", "msg": {"header": {"msg_type": "pyin"}, "content": {"execution_count": 3, "code": "x\ny"}}}
{"ch": "iopub", "msg": {"header": {"msg_type": "stream"}, "content": {"name": "stdout", "data": "\u001b[32mhello\u001b[0m\n"}}}
this line is not json
{"ch": "iopub", "msg": {"header": {"msg_type": "pyout"}, "content": {"execution_count": 3, "data": {"text/plain": "42"}}}}
{"ch": "iopub", "msg": {"header": {"msg_type": "error"}, "content": {"ename": "KeyError", "evalue": "'a'"}}}
"#;

    #[test]
    fn test_render_dump_with_legacy_names() {
        let lines = render_dump(DUMP.as_bytes(), &Config::default()).unwrap();
        assert_eq!(
            lines,
            vec![
                "In [3]: x",
                "....... y",
                "hello",
                "Out[3]: 42",
                "KeyError: 'a'",
                "",
            ]
        );
    }

    #[test]
    fn test_other_channels_are_ignored() {
        let notifications = read_notifications(DUMP.as_bytes()).unwrap();
        assert_eq!(notifications.len(), 5);
        assert_eq!(notifications[0], Notification::Status);
    }
}
