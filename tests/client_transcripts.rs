use coshell_core::client::{ChatEntry, ChatKind, SessionView};
use coshell_core::session::{
    ConnectionManager, ConnectionState, DisplayName, ManagerConfig, ManagerHandle,
};
use coshell_core::terminal::StreamRenderer;
use coshell_core::transport::mock::{MockConnector, MockRemote};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use url::Url;

#[derive(Default)]
struct RecordingView {
    states: Mutex<Vec<ConnectionState>>,
    chat: Mutex<Vec<ChatEntry>>,
    counts: Mutex<Vec<u32>>,
}

impl RecordingView {
    fn connected(&self) -> bool {
        self.states.lock().unwrap().last().copied() == Some(ConnectionState::Connected)
    }

    fn entries(&self) -> Vec<ChatEntry> {
        self.chat.lock().unwrap().clone()
    }

    fn counts(&self) -> Vec<u32> {
        self.counts.lock().unwrap().clone()
    }
}

impl SessionView for RecordingView {
    fn connection_changed(&self, state: ConnectionState) {
        self.states.lock().unwrap().push(state);
    }

    fn chat_entry(&self, entry: ChatEntry) {
        self.chat.lock().unwrap().push(entry);
    }

    fn participant_count(&self, count: u32) {
        self.counts.lock().unwrap().push(count);
    }

    fn scrollback_changed(&self) {}
}

struct Harness {
    view: Arc<RecordingView>,
    renderer: Arc<Mutex<StreamRenderer>>,
    remote: MockRemote,
    handle: ManagerHandle,
    task: JoinHandle<()>,
}

impl Harness {
    fn rows(&self) -> Vec<String> {
        self.renderer
            .lock()
            .unwrap()
            .lines()
            .iter()
            .map(|line| line.text().to_owned())
            .collect()
    }

    async fn finish(self) {
        self.handle.shutdown();
        self.task.await.unwrap();
    }
}

async fn join_session() -> Harness {
    let connector = Arc::new(MockConnector::new());
    let remote = connector.accept();
    remote.open();
    let view = Arc::new(RecordingView::default());
    let renderer = Arc::new(Mutex::new(StreamRenderer::new()));
    let config = ManagerConfig::new(Url::parse("ws://127.0.0.1:9/ws?username=alice").unwrap());
    let (handle, task) = ConnectionManager::spawn(
        DisplayName::parse("alice").unwrap(),
        config,
        connector,
        renderer.clone(),
        view.clone(),
    );
    let harness = Harness {
        view,
        renderer,
        remote,
        handle,
        task,
    };
    wait_until("connect", || harness.view.connected()).await;
    harness
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn output_frame(data: &str) -> String {
    json!({ "type": "output", "data": data }).to_string()
}

#[tokio::test]
async fn output_chunks_render_into_ordered_rows() {
    let harness = join_session().await;
    harness.remote.push_text(&output_frame("Hello\n"));
    harness.remote.push_text(&output_frame("Wor"));
    harness.remote.push_text(&output_frame("ld\r\n"));

    wait_until("rendered rows", || {
        let rows = harness.rows();
        rows.ends_with(&["Hello".to_string(), "World".to_string(), String::new()])
    })
    .await;
    {
        let renderer = harness.renderer.lock().unwrap();
        assert!(renderer.lines().last().unwrap().is_open());
    }
    harness.finish().await;
}

#[tokio::test]
async fn chat_system_and_echo_frames_land_in_the_chat_log() {
    let harness = join_session().await;
    harness
        .remote
        .push_text(&json!({ "type": "chat", "data": "hi there", "user": "bob" }).to_string());
    harness
        .remote
        .push_text(&json!({ "type": "input_info", "data": "💻 bob: ls" }).to_string());
    harness.remote.push_text(
        &json!({ "type": "system", "data": "🎉 bob님이 참가했습니다! (총 2명 접속중)" }).to_string(),
    );

    wait_until("dispatched entries", || harness.view.entries().len() >= 4).await;
    let entries = harness.view.entries();
    assert!(entries.contains(&ChatEntry::chat("bob", "hi there")));
    assert!(entries.contains(&ChatEntry::input("💻 bob: ls")));
    assert!(
        entries
            .iter()
            .any(|entry| entry.kind == ChatKind::System && entry.text.contains("참가했습니다"))
    );
    assert_eq!(harness.view.counts(), vec![2]);
    harness.finish().await;
}

#[tokio::test]
async fn system_notice_without_count_leaves_counter_untouched() {
    let harness = join_session().await;
    harness
        .remote
        .push_text(&json!({ "type": "system", "data": "shell restarted" }).to_string());

    wait_until("notice dispatched", || {
        harness
            .view
            .entries()
            .iter()
            .any(|entry| entry.text == "shell restarted")
    })
    .await;
    assert!(harness.view.counts().is_empty());
    harness.finish().await;
}

#[tokio::test]
async fn unknown_and_malformed_frames_are_dropped_quietly() {
    let harness = join_session().await;
    let before = harness.view.entries().len();
    harness
        .remote
        .push_text(&json!({ "type": "resize", "data": "80x24" }).to_string());
    harness.remote.push_text("not json at all");

    // A later valid frame still gets through: the connection is unharmed.
    harness.remote.push_text(&output_frame("still alive\n"));
    wait_until("stream continues", || {
        harness.rows().iter().any(|row| row == "still alive")
    })
    .await;
    assert_eq!(harness.view.entries().len(), before);
    assert!(harness.view.connected());
    harness.finish().await;
}

#[tokio::test]
async fn commands_echo_locally_and_carry_a_trailing_newline() {
    let harness = join_session().await;
    harness.handle.send_command("ls -la");

    wait_until("command frame sent", || {
        harness
            .remote
            .sent()
            .contains(&r#"{"type":"input","data":"ls -la\n"}"#.to_string())
    })
    .await;
    assert!(harness.rows().iter().any(|row| row == "$ ls -la"));
    harness.finish().await;
}

#[tokio::test]
async fn chat_messages_are_trimmed_and_tagged_with_the_sender() {
    let harness = join_session().await;
    harness.handle.send_chat("  hello everyone  ");

    wait_until("chat frame sent", || {
        harness
            .remote
            .sent()
            .contains(&r#"{"type":"chat","data":"hello everyone","user":"alice"}"#.to_string())
    })
    .await;
    harness.finish().await;
}

#[tokio::test]
async fn sends_fail_fast_while_not_connected() {
    let connector = Arc::new(MockConnector::new());
    let remote = connector.accept();
    // Never opened: the dial is accepted but the channel stays pending.
    let view = Arc::new(RecordingView::default());
    let renderer = Arc::new(Mutex::new(StreamRenderer::new()));
    let config = ManagerConfig::new(Url::parse("ws://127.0.0.1:9/ws?username=alice").unwrap());
    let (handle, task) = ConnectionManager::spawn(
        DisplayName::parse("alice").unwrap(),
        config,
        connector,
        renderer,
        view.clone(),
    );

    handle.send_command("ls");
    handle.send_chat("hello");
    wait_until("local error notices", || {
        view.entries()
            .iter()
            .filter(|entry| entry.text.contains("not connected"))
            .count()
            == 2
    })
    .await;
    assert!(remote.sent().is_empty());

    handle.shutdown();
    task.await.unwrap();
}
