// tests/integration/pipeline_test.rs

use super::test_helpers::{harness, map_channel, message, wait_until};
use specular::core::events::{SourceEvent, SourceMessageUpdate};
use specular::core::model::message::Embed;
use specular::core::pipeline::Pipeline;
use specular::core::store::Store;
use std::time::Duration;

const SRC_CHAN_A: &str = "11111111111111111111";
const MIR_CHAN_A: &str = "21111111111111111111";

#[tokio::test(start_paused = true)]
async fn test_happy_path_text_message() {
    let h = harness();
    map_channel(&h, SRC_CHAN_A, MIR_CHAN_A, "alpha").await;
    let pipeline = Pipeline::new(h.state.clone());

    let msg = message("18000000000000000001", SRC_CHAN_A, &format!("Hello <#{SRC_CHAN_A}>"));
    pipeline
        .on_source_event(SourceEvent::MessageCreated(msg))
        .await;

    assert!(
        wait_until(
            || h
                .endpoints
                .endpoint_for_channel(MIR_CHAN_A)
                .map(|e| e.sends.lock().len() == 1)
                .unwrap_or(false),
            Duration::from_secs(30),
        )
        .await,
        "mirror submission never happened"
    );

    let endpoint = h.endpoints.endpoint_for_channel(MIR_CHAN_A).unwrap();
    let payload = endpoint.sends.lock()[0].clone();
    assert_eq!(payload.content, format!("Hello <#{MIR_CHAN_A}>"));
    assert_eq!(payload.username, "alice");
    assert!(payload.avatar_url.is_some());
    assert!(payload.allowed_mentions.parse.is_empty());

    let record = h
        .store
        .find_processed("18000000000000000001")
        .await
        .unwrap()
        .expect("processed record must exist");
    assert_eq!(record.mirror_channel_id, MIR_CHAN_A);
    assert!(!record.awaiting_embed);
    assert_eq!(record.rendered_content, format!("Hello <#{MIR_CHAN_A}>"));

    // The commit reset the liveness timer, and exactly one channel worker
    // is running.
    assert!(!h.state.activity.is_down());
    assert_eq!(pipeline.worker_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rerun_of_same_message_commits_once() {
    let h = harness();
    map_channel(&h, SRC_CHAN_A, MIR_CHAN_A, "alpha").await;
    let pipeline = Pipeline::new(h.state.clone());

    let msg = message("18000000000000000002", SRC_CHAN_A, "once only");
    pipeline
        .on_source_event(SourceEvent::MessageCreated(msg.clone()))
        .await;
    assert!(
        wait_until(
            || h
                .endpoints
                .endpoint_for_channel(MIR_CHAN_A)
                .map(|e| !e.sends.lock().is_empty())
                .unwrap_or(false),
            Duration::from_secs(30),
        )
        .await
    );

    pipeline
        .on_source_event(SourceEvent::MessageCreated(msg))
        .await;
    // Give the rerun every chance to (wrongly) submit.
    tokio::time::sleep(Duration::from_secs(10)).await;

    let endpoint = h.endpoints.endpoint_for_channel(MIR_CHAN_A).unwrap();
    assert_eq!(endpoint.sends.lock().len(), 1);
    assert_eq!(h.store.count_processed().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_embed_merges_in_buffer() {
    let h = harness();
    map_channel(&h, SRC_CHAN_A, MIR_CHAN_A, "alpha").await;
    let pipeline = Pipeline::new(h.state.clone());

    let msg = message("18000000000000000003", SRC_CHAN_A, "http://example.com/x");
    pipeline
        .on_source_event(SourceEvent::MessageCreated(msg))
        .await;
    // The provider resolves the link into an embed two seconds later.
    pipeline
        .on_source_event(SourceEvent::MessageUpdated(SourceMessageUpdate {
            id: "18000000000000000003".to_string(),
            channel_id: SRC_CHAN_A.to_string(),
            content: Some("http://example.com/x".to_string()),
            embeds: vec![Embed {
                title: Some("X".to_string()),
                ..Default::default()
            }],
        }))
        .await;

    assert!(
        wait_until(
            || h
                .endpoints
                .endpoint_for_channel(MIR_CHAN_A)
                .map(|e| e.sends.lock().len() == 1)
                .unwrap_or(false),
            Duration::from_secs(30),
        )
        .await
    );

    let endpoint = h.endpoints.endpoint_for_channel(MIR_CHAN_A).unwrap();
    let payload = endpoint.sends.lock()[0].clone();
    assert_eq!(payload.content, "http://example.com/x");
    assert_eq!(payload.embeds.len(), 1);
    assert_eq!(payload.embeds[0].title.as_deref(), Some("X"));
    // The buffered create and the update collapsed into one message.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(endpoint.sends.lock().len(), 1);

    let record = h
        .store
        .find_processed("18000000000000000003")
        .await
        .unwrap()
        .unwrap();
    assert!(!record.awaiting_embed);
}

#[tokio::test(start_paused = true)]
async fn test_unbuffered_plain_message_flushes_after_window() {
    let h = harness();
    map_channel(&h, SRC_CHAN_A, MIR_CHAN_A, "alpha").await;
    let pipeline = Pipeline::new(h.state.clone());

    let msg = message("18000000000000000004", SRC_CHAN_A, "no embed coming");
    pipeline
        .on_source_event(SourceEvent::MessageCreated(msg))
        .await;

    assert!(
        wait_until(
            || h
                .endpoints
                .endpoint_for_channel(MIR_CHAN_A)
                .map(|e| e.sends.lock().len() == 1)
                .unwrap_or(false),
            Duration::from_secs(30),
        )
        .await
    );
    // The message body had a link? No: so it never awaited an embed.
    let record = h
        .store
        .find_processed("18000000000000000004")
        .await
        .unwrap()
        .unwrap();
    assert!(!record.awaiting_embed);
}

#[tokio::test(start_paused = true)]
async fn test_missing_channel_mention_deferred_creation() {
    let h = harness();
    map_channel(&h, SRC_CHAN_A, MIR_CHAN_A, "alpha").await;
    // The referenced channel exists on the source but has no mirror yet.
    h.observation.seed_channel(
        "12222222222222222222",
        "new-stuff",
        specular::core::model::ChannelKind::Text,
    );
    let pipeline = Pipeline::new(h.state.clone());

    let msg = message(
        "18000000000000000005",
        SRC_CHAN_A,
        "see <#12222222222222222222>",
    );
    pipeline
        .on_source_event(SourceEvent::MessageCreated(msg))
        .await;

    // Committed immediately with the bolded placeholder.
    assert!(
        wait_until(
            || h
                .endpoints
                .endpoint_for_channel(MIR_CHAN_A)
                .map(|e| !e.sends.lock().is_empty())
                .unwrap_or(false),
            Duration::from_secs(30),
        )
        .await
    );
    let endpoint = h.endpoints.endpoint_for_channel(MIR_CHAN_A).unwrap();
    assert_eq!(endpoint.sends.lock()[0].content, "see **#new-stuff**");

    // The deferred job creates the mirror channel and edits in place.
    assert!(
        wait_until(
            || !endpoint.edits.lock().is_empty(),
            Duration::from_secs(30),
        )
        .await,
        "deferred edit never happened"
    );
    let created = h
        .control
        .created_channels
        .lock()
        .iter()
        .find(|c| c.name == "new-stuff")
        .cloned()
        .expect("mirror channel was created");
    let (_, edited) = endpoint.edits.lock()[0].clone();
    assert_eq!(edited.content, format!("see <#{}>", created.id));

    let record = h
        .store
        .find_processed("18000000000000000005")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.rendered_content, format!("see <#{}>", created.id));
}

#[tokio::test(start_paused = true)]
async fn test_noise_authors_are_dropped() {
    let h = harness();
    map_channel(&h, SRC_CHAN_A, MIR_CHAN_A, "alpha").await;
    let pipeline = Pipeline::new(h.state.clone());

    let mut msg = message("18000000000000000006", SRC_CHAN_A, "spam spam");
    msg.author.username = "MEE6".to_string();
    msg.author.is_bot = true;
    pipeline
        .on_source_event(SourceEvent::MessageCreated(msg))
        .await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.endpoints.endpoint_for_channel(MIR_CHAN_A).is_none());
    assert_eq!(h.store.count_processed().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reaction_replicates_when_emoji_exists() {
    let h = harness();
    map_channel(&h, SRC_CHAN_A, MIR_CHAN_A, "alpha").await;
    let pipeline = Pipeline::new(h.state.clone());

    let msg = message("18000000000000000007", SRC_CHAN_A, "react to me");
    pipeline
        .on_source_event(SourceEvent::MessageCreated(msg))
        .await;
    assert!(
        wait_until(
            || h
                .endpoints
                .endpoint_for_channel(MIR_CHAN_A)
                .map(|e| !e.sent_ids.lock().is_empty())
                .unwrap_or(false),
            Duration::from_secs(30),
        )
        .await
    );

    pipeline
        .on_source_event(SourceEvent::ReactionAdded {
            channel_id: SRC_CHAN_A.to_string(),
            message_id: "18000000000000000007".to_string(),
            reaction: specular::core::model::message::Reaction {
                emoji: "👍".to_string(),
                emoji_id: None,
            },
        })
        .await;

    assert!(
        wait_until(|| !h.control.reactions.lock().is_empty(), Duration::from_secs(30)).await,
        "reaction never replicated"
    );
    let reactions = h.control.reactions.lock().clone();
    assert_eq!(reactions[0].0, MIR_CHAN_A);
    assert_eq!(reactions[0].2, "👍");
}

#[tokio::test(start_paused = true)]
async fn test_mention_notification_goes_to_log_channel() {
    let h = harness();
    map_channel(&h, SRC_CHAN_A, MIR_CHAN_A, "alpha").await;
    // A mapped role so the mention stays live.
    let mut role = specular::core::model::RoleMapping::new(
        "13333333333333333333",
        super::test_helpers::SRC_SERVER,
        "raiders",
    );
    role.mirror_role_id = Some("23333333333333333333".to_string());
    h.state
        .correspondence
        .register_role_mapping(&role)
        .await
        .unwrap();
    let pipeline = Pipeline::new(h.state.clone());

    let msg = message(
        "18000000000000000008",
        SRC_CHAN_A,
        "<@&13333333333333333333> rally up",
    );
    pipeline
        .on_source_event(SourceEvent::MessageCreated(msg))
        .await;

    assert!(
        wait_until(
            || h
                .control
                .posted
                .lock()
                .iter()
                .any(|(chan, _, _)| chan == "mention-channel"),
            Duration::from_secs(30),
        )
        .await,
        "mention notification never posted"
    );
    // The outbound payload carries the live role for notification.
    let endpoint = h.endpoints.endpoint_for_channel(MIR_CHAN_A).unwrap();
    let payload = endpoint.sends.lock()[0].clone();
    assert_eq!(
        payload.allowed_mentions.roles,
        vec!["23333333333333333333".to_string()]
    );
    assert!(!h.store.role_mention_records().is_empty());
}
