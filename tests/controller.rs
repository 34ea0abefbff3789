//! Reply streaming tests
//!
//! Drives `StreamController` with scripted deltas and a recording sink

use std::sync::Arc;
use std::time::Duration;

use bonegpt::chat::Delta;
use bonegpt::controller::{StreamController, StreamState};
use bonegpt::voice::{Sanitizer, SpeechSink};
use bonegpt::{Conversation, Error, Role};
use tokio_test::assert_ok;

mod common;

use common::{FailingChat, RecordingSink, ScriptedChat, SinkEvent, StallingChat};

fn conversation_with(question: &str) -> Conversation {
    let mut conversation = Conversation::default();
    conversation.add_message(Role::User, question);
    conversation
}

fn controller(
    chat: Arc<dyn bonegpt::chat::ChatProvider>,
    sink: RecordingSink,
) -> StreamController<RecordingSink> {
    StreamController::new(chat, sink, Arc::new(Sanitizer::default()))
}

#[tokio::test]
async fn test_single_sentence_reply() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let mut controller = controller(ScriptedChat::reply(&["Hi", "."]), sink);
    let mut conversation = conversation_with("Hello?");

    let reply = assert_ok!(controller.respond(&mut conversation).await);

    assert_eq!(reply.text, "Hi.");
    assert_eq!(reply.chunks_spoken, 1);
    assert_eq!(conversation.len(), 3);
    assert_eq!(conversation.current_role(), Some(Role::Assistant));
    assert_eq!(conversation.last_message_text(), Some("Hi."));
    assert_eq!(
        *log.lock().unwrap(),
        [
            SinkEvent::Open,
            SinkEvent::Write("Hi.".to_string()),
            SinkEvent::Close
        ]
    );
    assert_eq!(controller.state(), StreamState::Idle);
}

#[tokio::test]
async fn test_sentences_are_spoken_in_order() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let chat = ScriptedChat::reply(&["Hello", " there.", " How are you", "?", " I am bones"]);
    let mut controller = controller(chat, sink);
    let mut conversation = conversation_with("Hi");

    let reply = assert_ok!(controller.respond(&mut conversation).await);

    assert_eq!(reply.text, "Hello there. How are you? I am bones");
    assert_eq!(
        *log.lock().unwrap(),
        [
            SinkEvent::Open,
            SinkEvent::Write("Hello there.".to_string()),
            SinkEvent::Write("How are you?".to_string()),
            SinkEvent::Write("I am bones".to_string()),
            SinkEvent::Close
        ]
    );
}

#[tokio::test]
async fn test_chunks_are_sanitized_but_history_is_not() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let chat = ScriptedChat::reply(&["I am **BoneGPT**", "!"]);
    let mut controller = controller(chat, sink);
    let mut conversation = conversation_with("Who are you?");

    assert_ok!(controller.respond(&mut conversation).await);

    assert_eq!(conversation.last_message_text(), Some("I am **BoneGPT**!"));
    assert_eq!(
        log.lock().unwrap()[1],
        SinkEvent::Write("I am bone G P T!".to_string())
    );
}

#[tokio::test]
async fn test_empty_reply_never_opens_pipeline() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let chat = ScriptedChat::streaming(vec![Ok(Delta::role(Role::Assistant)), Ok(Delta::finish())]);
    let mut controller = controller(chat, sink);
    let mut conversation = conversation_with("...");

    let reply = assert_ok!(controller.respond(&mut conversation).await);

    assert_eq!(reply.text, "");
    assert_eq!(reply.chunks_spoken, 0);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_content_before_role_starts_assistant_turn() {
    let chat = ScriptedChat::streaming(vec![Ok(Delta::content("Boo!")), Ok(Delta::finish())]);
    let mut controller = controller(chat, RecordingSink::new());
    let mut conversation = conversation_with("Scare me");

    let reply = assert_ok!(controller.respond(&mut conversation).await);

    assert_eq!(reply.text, "Boo!");
    assert_eq!(conversation.current_role(), Some(Role::Assistant));
    assert_eq!(conversation.len(), 3);
}

#[tokio::test]
async fn test_non_assistant_content_is_recorded_but_not_spoken() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let chat = ScriptedChat::streaming(vec![
        Ok(Delta::role(Role::System)),
        Ok(Delta::content("Internal note.")),
        Ok(Delta::finish()),
    ]);
    let mut controller = controller(chat, sink);
    let mut conversation = conversation_with("Hi");

    assert_ok!(controller.respond(&mut conversation).await);

    assert_eq!(conversation.current_role(), Some(Role::System));
    assert_eq!(conversation.last_message_text(), Some("Internal note."));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stream_without_finish_flushes_and_closes() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let chat = ScriptedChat::streaming(vec![
        Ok(Delta::role(Role::Assistant)),
        Ok(Delta::content("First.")),
        Ok(Delta::content(" Then the connection")),
    ]);
    let mut controller = controller(chat, sink);
    let mut conversation = conversation_with("Tell me a story");

    let err = controller.respond(&mut conversation).await.unwrap_err();

    assert!(matches!(err, Error::RemoteStream(_)));
    assert_eq!(
        conversation.last_message_text(),
        Some("First. Then the connection")
    );
    assert_eq!(
        *log.lock().unwrap(),
        [
            SinkEvent::Open,
            SinkEvent::Write("First.".to_string()),
            SinkEvent::Write("Then the connection".to_string()),
            SinkEvent::Close
        ]
    );
    assert_eq!(controller.state(), StreamState::Idle);
}

#[tokio::test]
async fn test_transport_error_mid_stream_closes_pipeline() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let chat = ScriptedChat::streaming(vec![
        Ok(Delta::role(Role::Assistant)),
        Ok(Delta::content("Half a")),
        Err(Error::RemoteStream("connection reset".to_string())),
        Ok(Delta::content(" never seen.")),
    ]);
    let mut controller = controller(chat, sink);
    let mut conversation = conversation_with("Go on");

    let err = controller.respond(&mut conversation).await.unwrap_err();

    assert!(matches!(err, Error::RemoteStream(msg) if msg == "connection reset"));
    assert_eq!(conversation.last_message_text(), Some("Half a"));
    assert_eq!(
        *log.lock().unwrap(),
        [
            SinkEvent::Open,
            SinkEvent::Write("Half a".to_string()),
            SinkEvent::Close
        ]
    );
}

#[tokio::test]
async fn test_request_failure_leaves_conversation_untouched() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let mut controller = controller(Arc::new(FailingChat), sink);
    let mut conversation = conversation_with("Anyone there?");

    let err = controller.respond(&mut conversation).await.unwrap_err();

    assert!(matches!(err, Error::Chat(_)));
    assert_eq!(conversation.len(), 2);
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(controller.state(), StreamState::Idle);
}

#[tokio::test]
async fn test_spawn_failure_keeps_reply_text() {
    let chat = ScriptedChat::reply(&["One.", " Two.", " Three."]);
    let mut controller = controller(chat, RecordingSink::unspawnable());
    let mut conversation = conversation_with("Count");

    let err = controller.respond(&mut conversation).await.unwrap_err();

    assert!(matches!(err, Error::PipelineSpawn { stage: "synthesis", .. }));
    assert_eq!(conversation.last_message_text(), Some("One. Two. Three."));
    assert!(!controller.sink().is_open());
}

#[tokio::test]
async fn test_broken_pipe_reopens_for_next_chunk() {
    let sink = RecordingSink::with_failing_writes(1);
    let log = sink.log();
    let chat = ScriptedChat::reply(&["Lost.", " Found."]);
    let mut controller = controller(chat, sink);
    let mut conversation = conversation_with("Hi");

    let reply = assert_ok!(controller.respond(&mut conversation).await);

    assert_eq!(reply.chunks_spoken, 1);
    assert_eq!(
        *log.lock().unwrap(),
        [
            SinkEvent::Open,
            SinkEvent::Close,
            SinkEvent::Open,
            SinkEvent::Write("Found.".to_string()),
            SinkEvent::Close
        ]
    );
}

#[tokio::test]
async fn test_blocking_reply_is_recorded_then_vocalized() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let chat = ScriptedChat::blocking("Rattle rattle.");
    let mut controller = controller(chat.clone(), sink);
    let mut conversation = conversation_with("Make a noise");

    let reply = assert_ok!(controller.respond_blocking(&mut conversation).await);

    assert_eq!(reply.text, "Rattle rattle.");
    assert_eq!(conversation.last_message_text(), Some("Rattle rattle."));
    assert_eq!(
        *log.lock().unwrap(),
        [SinkEvent::Vocalize("Rattle rattle.".to_string())]
    );
    assert_eq!(chat.request_count(), 1);
}

#[tokio::test]
async fn test_request_carries_whole_history() {
    let chat = ScriptedChat::reply(&["Yes."]);
    let mut controller = controller(chat.clone(), RecordingSink::new());
    let mut conversation = conversation_with("Are you there?");

    assert_ok!(controller.respond(&mut conversation).await);

    let requests = chat.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].len(), 2);
    assert_eq!(requests[0][1].content, "Are you there?");
}

#[tokio::test]
async fn test_shutdown_without_reply_is_noop() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let mut controller = controller(ScriptedChat::reply(&[]), sink);

    assert_ok!(controller.shutdown().await);
    assert!(log.lock().unwrap().is_empty());
}

async fn stalled_state(role: Role, fragments: &[&str]) -> (StreamState, Conversation) {
    let mut stalled = controller(StallingChat::after(role, fragments), RecordingSink::new());
    let mut conversation = conversation_with("Hi");

    let pending =
        tokio::time::timeout(Duration::from_millis(50), stalled.respond(&mut conversation)).await;
    assert!(pending.is_err());

    (stalled.state(), conversation)
}

#[tokio::test]
async fn test_only_assistant_role_starts_streaming_turn() {
    let (state, conversation) = stalled_state(Role::System, &["Internal note."]).await;
    assert_eq!(state, StreamState::AwaitingFirstDelta);
    assert_eq!(conversation.current_role(), Some(Role::System));

    let (state, conversation) = stalled_state(Role::Assistant, &["Still"]).await;
    assert_eq!(state, StreamState::StreamingAssistantTurn);
    assert_eq!(conversation.last_message_text(), Some("Still"));
}
