//! End-to-end turns against the mock provider

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_settings, file_engine, memory_engine};
use persona_chat::chat::{Directive, EngineEvent, SendRequest, Workspace};
use persona_chat::provider::{GenerateScript, MockFailure, MockProvider, ScriptStep, StreamScript};
use persona_chat::store::{ConversationDb, FileStore};
use persona_chat::types::{ConversationSettings, Sender};
use persona_chat::Error;
use tempfile::TempDir;

fn persona(name: &str) -> Sender {
    Sender::Persona(name.to_string())
}

#[tokio::test]
async fn test_two_mentions_reply_in_parallel() {
    let provider = Arc::new(MockProvider::new());
    provider
        .route_stream("由 **吴军**", StreamScript::fragments(["我认为", "这是对的"]))
        .route_stream("由 **万维钢**", StreamScript::fragments(["万维钢: ", "数据说明一切"]));
    let engine = memory_engine(provider.clone(), fast_settings());

    let outcome = engine
        .send_message(SendRequest::text("@吴军 @万维钢 你们怎么看"))
        .await
        .unwrap();

    assert_eq!(outcome.replies.len(), 2);
    assert!(outcome.errors.is_empty());
    assert_eq!(provider.call_count("stream_completion"), 2);
    assert!(!engine.is_loading(&outcome.conversation_id));

    let convo = engine.workspace().active_conversation().unwrap();
    assert!(!convo.has_placeholders());

    let wu = convo.message(outcome.replies[0]).unwrap();
    assert_eq!(wu.sender, persona("吴军"));
    assert_eq!(wu.text, "我认为这是对的");

    let wan = convo.message(outcome.replies[1]).unwrap();
    assert_eq!(wan.sender, persona("万维钢"));
    assert_eq!(wan.text, "数据说明一切");
}

#[tokio::test]
async fn test_single_mention_directs_without_fallback_sender() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_stream(StreamScript::fragments(["没有署名的回答"]));
    let engine = memory_engine(provider.clone(), fast_settings());

    let outcome = engine.send_message(SendRequest::text("@吴军 说说看")).await.unwrap();

    let prompt = &provider.requests("stream_completion")[0].prompt;
    assert!(prompt.contains("用户指定了由 **吴军** 来回答"));

    let reply = engine
        .workspace()
        .message(&outcome.conversation_id, outcome.replies[0])
        .unwrap();
    assert_eq!(reply.sender, Sender::UnattributedAi);
}

#[tokio::test]
async fn test_single_mention_fan_out_when_enabled() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_stream(StreamScript::fragments(["没有署名的回答"]));
    let mut settings = fast_settings();
    settings.fan_out_single_mention = true;
    let engine = memory_engine(provider, settings);

    let outcome = engine.send_message(SendRequest::text("@吴军 说说看")).await.unwrap();

    let reply = engine
        .workspace()
        .message(&outcome.conversation_id, outcome.replies[0])
        .unwrap();
    assert_eq!(reply.sender, persona("吴军"));
    assert_eq!(reply.text, "没有署名的回答");
}

#[tokio::test]
async fn test_let_ai_choose_without_user_text() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_stream(StreamScript::fragments(["贾行家：", "接着说"]));
    let engine = memory_engine(provider.clone(), fast_settings());

    let outcome = engine
        .send_message(SendRequest::next(Directive::LetAiChoose))
        .await
        .unwrap();

    assert!(outcome.user_message_id.is_none());
    let prompt = &provider.requests("stream_completion")[0].prompt;
    assert!(prompt.contains("用户让你来决定谁来接话"));

    let convo = engine.workspace().active_conversation().unwrap();
    assert_eq!(convo.real_message_count(), 1);
    assert_eq!(convo.message(outcome.replies[0]).unwrap().sender, persona("贾行家"));
}

#[tokio::test]
async fn test_stream_error_falls_back_once() {
    let provider = Arc::new(MockProvider::new());
    provider
        .queue_stream(StreamScript::Steps(vec![ScriptStep::Fail(MockFailure::Decode)]))
        .queue_generate(GenerateScript::Reply("吴军: 非流式回答".to_string()));
    let engine = memory_engine(provider.clone(), fast_settings());

    let outcome = engine.send_message(SendRequest::text("你好")).await.unwrap();
    engine.wait_background().await;

    assert!(outcome.errors.is_empty());
    assert_eq!(provider.call_count("generate_completion"), 1);

    let reply = engine
        .workspace()
        .message(&outcome.conversation_id, outcome.replies[0])
        .unwrap();
    assert_eq!(reply.sender, persona("吴军"));
    assert_eq!(reply.text, "非流式回答");
}

#[tokio::test]
async fn test_partial_reply_kept_after_error() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_stream(StreamScript::Steps(vec![
        ScriptStep::Text("贾行家: 前半段".to_string()),
        ScriptStep::Fail(MockFailure::Transport),
    ]));
    let engine = memory_engine(provider.clone(), fast_settings());

    let outcome = engine.send_message(SendRequest::text("讲个故事")).await.unwrap();

    assert_eq!(outcome.replies.len(), 1);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(provider.call_count("generate_completion"), 0);

    let convo = engine.workspace().active_conversation().unwrap();
    let reply = convo.message(outcome.replies[0]).unwrap();
    assert_eq!(reply.text, "前半段");

    let last = convo.real_messages().last().unwrap();
    assert_eq!(last.sender, Sender::System);
    assert!(last.text.contains("Transport error"));
}

#[tokio::test]
async fn test_fallback_failure_reports_unavailable() {
    let provider = Arc::new(MockProvider::new());
    provider
        .queue_stream(StreamScript::Steps(vec![ScriptStep::Fail(MockFailure::Transport)]))
        .queue_generate(GenerateScript::Fail(MockFailure::Transport));
    let engine = memory_engine(provider, fast_settings());

    let outcome = engine.send_message(SendRequest::text("你好")).await.unwrap();

    assert!(outcome.replies.is_empty());
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].contains("temporarily unavailable"));

    let convo = engine.workspace().active_conversation().unwrap();
    assert!(!convo.has_placeholders());
    assert_eq!(convo.real_messages().last().unwrap().sender, Sender::System);
}

#[tokio::test]
async fn test_missing_credential_is_not_retried() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_stream(StreamScript::FailSetup(MockFailure::MissingKey));
    let engine = memory_engine(provider.clone(), fast_settings());

    let outcome = engine.send_message(SendRequest::text("你好")).await.unwrap();

    assert_eq!(provider.call_count("stream_completion"), 1);
    assert_eq!(provider.call_count("generate_completion"), 0);
    assert!(outcome.errors[0].contains("API key is not set"));
}

#[tokio::test]
async fn test_long_message_summarized_in_background() {
    let provider = Arc::new(MockProvider::new());
    provider.route_generate("摘要", GenerateScript::Reply("  短摘要  ".to_string()));
    let engine = memory_engine(provider.clone(), fast_settings());

    let long_text = "字".repeat(150);
    let outcome = engine.send_message(SendRequest::text(long_text)).await.unwrap();
    engine.wait_background().await;

    let user = engine
        .workspace()
        .message(&outcome.conversation_id, outcome.user_message_id.unwrap())
        .unwrap();
    assert_eq!(user.summary.as_deref(), Some("短摘要"));
    assert_eq!(provider.call_count("generate_completion"), 1);
    assert_eq!(provider.requests("generate_completion")[0].model, "summary-model");
}

#[tokio::test]
async fn test_short_message_not_summarized() {
    let provider = Arc::new(MockProvider::new());
    let engine = memory_engine(provider.clone(), fast_settings());

    let outcome = engine
        .send_message(SendRequest::text("字".repeat(80)))
        .await
        .unwrap();
    engine.wait_background().await;

    let user = engine
        .workspace()
        .message(&outcome.conversation_id, outcome.user_message_id.unwrap())
        .unwrap();
    assert!(user.summary.is_none());
    assert_eq!(provider.call_count("generate_completion"), 0);
}

#[tokio::test]
async fn test_title_generated_after_three_messages() {
    let provider = Arc::new(MockProvider::new());
    provider
        .route_stream("由 **吴军**", StreamScript::fragments(["吴军: 先说结论"]))
        .route_stream("由 **贾行家**", StreamScript::fragments(["贾行家: 我补充一点"]))
        .route_generate("标题", GenerateScript::Reply("“量子计算入门”。".to_string()));
    let engine = memory_engine(provider, fast_settings());
    let mut events = engine.subscribe();

    let outcome = engine
        .send_message(SendRequest::text("@吴军 @贾行家 量子计算怎么入门"))
        .await
        .unwrap();
    engine.wait_background().await;

    let convo = engine.workspace().conversation(&outcome.conversation_id).unwrap();
    assert_eq!(convo.title, "量子计算入门");

    let mut titled = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::TitleChanged { title, .. } = event {
            assert_eq!(title, "量子计算入门");
            titled = true;
        }
    }
    assert!(titled);
}

#[tokio::test]
async fn test_title_not_generated_for_short_conversation() {
    let provider = Arc::new(MockProvider::new());
    let engine = memory_engine(provider.clone(), fast_settings());

    engine.send_message(SendRequest::text("你好")).await.unwrap();
    engine.wait_background().await;

    let convo = engine.workspace().active_conversation().unwrap();
    assert!(convo.has_default_title());
    assert_eq!(provider.call_count("generate_completion"), 0);
}

#[tokio::test]
async fn test_no_active_persona_reports_system_message() {
    let provider = Arc::new(MockProvider::new());
    let engine = memory_engine(provider.clone(), fast_settings());
    let id = engine.workspace().active_conversation_id().unwrap();
    engine
        .workspace()
        .update_settings(
            &id,
            ConversationSettings {
                active_persona_ids: Some(Vec::new()),
                ..Default::default()
            },
        )
        .unwrap();

    let outcome = engine.send_message(SendRequest::text("有人吗")).await.unwrap();

    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(provider.call_count("stream_completion"), 0);
    let convo = engine.workspace().conversation(&id).unwrap();
    let last = convo.real_messages().last().unwrap();
    assert_eq!(last.sender, Sender::System);
    assert!(last.text.contains("No active personas"));
}

#[tokio::test]
async fn test_concurrent_turn_rejected() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_stream(StreamScript::Steps(vec![
        ScriptStep::Delay(Duration::from_millis(100)),
        ScriptStep::Text("吴军: 慢慢来".to_string()),
    ]));
    let engine = memory_engine(provider, fast_settings());
    let id = engine.workspace().active_conversation_id().unwrap();

    let (first, second) = tokio::join!(engine.send_message(SendRequest::text("第一条")), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.is_loading(&id));
        engine.send_message(SendRequest::text("第二条")).await
    });

    assert_eq!(first.unwrap().replies.len(), 1);
    assert!(matches!(second, Err(Error::TurnInFlight(_))));
    assert!(!engine.is_loading(&id));

    // The gate reopens once the first turn finishes
    engine.send_message(SendRequest::text("第三条")).await.unwrap();
}

#[tokio::test]
async fn test_event_sequence() {
    let provider = Arc::new(MockProvider::new());
    provider.queue_stream(StreamScript::fragments(["吴军: 你", "好"]));
    let engine = memory_engine(provider, fast_settings());
    let mut events = engine.subscribe();

    engine.send_message(SendRequest::text("打个招呼")).await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    match received.first() {
        Some(EngineEvent::MessageAppended { message, .. }) => assert!(message.sender.is_user()),
        other => panic!("Expected user message first, got {:?}", other),
    }
    assert!(received.iter().any(|e| matches!(
        e,
        EngineEvent::MessageAppended { message, .. } if message.thinking
    )));
    assert!(received
        .iter()
        .any(|e| matches!(e, EngineEvent::MessageRemoved { .. })));
    assert!(received.iter().any(|e| matches!(
        e,
        EngineEvent::FragmentReceived { fragment, .. } if fragment == "好"
    )));
    assert!(received.iter().any(|e| matches!(
        e,
        EngineEvent::MessageFinalized { message, .. }
            if message.text == "你好" && message.sender == Sender::Persona("吴军".to_string())
    )));
    match received.last() {
        Some(EngineEvent::TurnCompleted { replies, errors, .. }) => {
            assert_eq!(*replies, 1);
            assert_eq!(*errors, 0);
        }
        other => panic!("Expected TurnCompleted last, got {:?}", other),
    }
}

#[tokio::test]
async fn test_turn_persisted_to_disk() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new());
    provider.queue_stream(StreamScript::fragments(["万维钢: 有数据支持"]));

    let id = {
        let engine = file_engine(dir.path(), provider, fast_settings());
        let outcome = engine.send_message(SendRequest::text("证据呢")).await.unwrap();
        engine.wait_background().await;
        outcome.conversation_id
    };

    let db = ConversationDb::new(Arc::new(FileStore::open(dir.path()).unwrap()));
    let workspace = Workspace::open(db, 10).unwrap();
    assert_eq!(workspace.active_conversation_id().as_deref(), Some(id.as_str()));

    let convo = workspace.conversation(&id).unwrap();
    let texts: Vec<&str> = convo.messages().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["证据呢", "有数据支持"]);
    assert!(!convo.has_placeholders());
}
