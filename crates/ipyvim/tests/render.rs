//! Draining broadcast messages into a scratch log.

mod common;

use common::{connected_session, test_config, RecordingSignals};
use ipyvim::message::Notification;
use ipyvim::{KernelSession, MessageRenderer, ScratchBuffer};

#[test]
fn test_drain_is_idempotent_when_nothing_is_pending() {
    let config = test_config();
    let (mut session, _script) = connected_session(&config, RecordingSignals::default());
    let mut renderer = MessageRenderer::new(&config);
    let mut log = ScratchBuffer::visible();

    assert!(!renderer.drain_and_render(&mut session, &mut log, false));
    let after_first = log.lines.clone();
    assert!(!renderer.drain_and_render(&mut session, &mut log, false));
    assert_eq!(log.lines, after_first);
    assert!(log.lines.is_empty());
}

#[test]
fn test_drain_renders_in_arrival_order() {
    let config = test_config();
    let (mut session, script) = connected_session(&config, RecordingSignals::default());
    script.borrow_mut().broadcasts.extend([
        Notification::Status,
        Notification::ExecuteInput {
            count: 42,
            code: "def f():\n    return 1\nf()".into(),
        },
        Notification::stdout("\x1b[31mred\x1b[0m text\n"),
        Notification::ExecuteResult {
            count: 42,
            text: "1".into(),
        },
        Notification::Other {
            msg_type: "comm_msg".into(),
        },
        Notification::Status,
    ]);
    let mut renderer = MessageRenderer::new(&config);
    let mut log = ScratchBuffer::visible();

    assert!(renderer.drain_and_render(&mut session, &mut log, false));
    assert_eq!(
        log.lines,
        vec![
            "In [42]: def f():",
            "........     return 1",
            "........ f()",
            "red text",
            "Out[42]: 1",
            "",
        ]
    );
    assert_eq!(log.scrolls, 1);

    // Everything was consumed; the trailing blank line is not repeated
    assert!(!renderer.drain_and_render(&mut session, &mut log, false));
    assert_eq!(log.lines.len(), 6);
}

#[test]
fn test_error_block() {
    let config = test_config();
    let (mut session, script) = connected_session(&config, RecordingSignals::default());
    script.borrow_mut().broadcasts.push_back(Notification::Error {
        traceback: vec![
            "\x1b[0;31m----------\x1b[0m".into(),
            "\x1b[0;31mZeroDivisionError\x1b[0m: division by zero".into(),
        ],
        name: "ZeroDivisionError".into(),
        value: "division by zero".into(),
    });
    let mut renderer = MessageRenderer::new(&config);
    let mut log = ScratchBuffer::visible();

    renderer.drain_and_render(&mut session, &mut log, false);
    assert_eq!(
        log.lines,
        vec![
            "----------",
            "ZeroDivisionError: division by zero",
            "ZeroDivisionError: division by zero",
            "",
        ]
    );
}

#[test]
fn test_hidden_log_waits_unless_forced() {
    let config = test_config();
    let (mut session, script) = connected_session(&config, RecordingSignals::default());
    script
        .borrow_mut()
        .broadcasts
        .push_back(Notification::stdout("hello\n"));
    let mut renderer = MessageRenderer::new(&config);
    let mut log = ScratchBuffer::new();

    assert!(!renderer.drain_and_render(&mut session, &mut log, false));
    assert!(log.lines.is_empty());
    assert_eq!(script.borrow().broadcasts.len(), 1);

    assert!(renderer.drain_and_render(&mut session, &mut log, true));
    assert_eq!(log.lines, vec!["hello", ""]);
    assert!(log.visible);
    assert_eq!(log.restores, 1);
}

#[test]
fn test_no_connection_renders_nothing() {
    let config = test_config();
    let mut session = KernelSession::new(&config);
    let mut renderer = MessageRenderer::new(&config);
    let mut log = ScratchBuffer::visible();

    assert!(!renderer.drain_and_render(&mut session, &mut log, true));
    assert!(log.lines.is_empty());
    assert_eq!(log.scrolls, 0);
}

#[test]
fn test_display_data_numbered_by_last_result() {
    let config = test_config();
    let (mut session, script) = connected_session(&config, RecordingSignals::default());
    script.borrow_mut().broadcasts.extend([
        Notification::ExecuteInput {
            count: 7,
            code: "plot()".into(),
        },
        Notification::DisplayData {
            text: "<Figure size 640x480 with 1 Axes>".into(),
        },
    ]);
    let mut renderer = MessageRenderer::new(&config);
    let mut log = ScratchBuffer::visible();

    renderer.drain_and_render(&mut session, &mut log, false);
    assert_eq!(
        log.lines,
        vec![
            "In [7]: plot()",
            "Out[7]: <Figure size 640x480 with 1 Axes>",
            "",
        ]
    );
}
