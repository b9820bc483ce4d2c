// tests/integration/recovery_test.rs

use super::test_helpers::{SRC_SERVER, harness, message, wait_until};
use specular::core::events::SourceEvent;
use specular::core::model::channel::ProcessedMessage;
use specular::core::model::{ChannelKind, ChannelMapping};
use specular::core::pipeline::Pipeline;
use specular::core::recovery::recovery_key;
use specular::core::store::Store;
use std::time::Duration;

const SRC_CHAN: &str = "11111111111111111111";
const DEAD_MIRROR: &str = "29999999999999999999";

/// Scenario: the mirror channel was deleted by hand. The pipeline resolves
/// nothing, recovery forces a sync (finds nothing to adopt), creates the
/// channel manually, commits the triggering message, and backfills the
/// gap with dedup against already-processed ids.
#[tokio::test(start_paused = true)]
async fn test_recovery_recreates_channel_and_backfills() {
    let h = harness();

    // A stale mapping: the stored mirror id does not exist on the mirror.
    let mut mapping = ChannelMapping::new(SRC_CHAN, SRC_SERVER, "chess", ChannelKind::Text);
    mapping.mirror_channel_id = Some(DEAD_MIRROR.to_string());
    mapping.scraped = true;
    h.store.upsert_channel(&mapping).await.unwrap();

    // The source side is healthy and has history.
    h.observation.seed_channel(SRC_CHAN, "chess", ChannelKind::Text);
    let older_a = message("17000000000000000001", SRC_CHAN, "first old message");
    let older_b = message("17000000000000000002", SRC_CHAN, "second old message");
    let already = message("17000000000000000003", SRC_CHAN, "already mirrored");
    // Newest first, the way the provider returns history.
    h.observation.seed_history(
        SRC_CHAN,
        vec![already.clone(), older_b.clone(), older_a.clone()],
    );
    // One of them was processed before the mirror channel died.
    h.store
        .insert_processed(&ProcessedMessage {
            source_message_id: already.id.clone(),
            source_channel_id: SRC_CHAN.to_string(),
            mirror_message_id: "gone".to_string(),
            mirror_channel_id: DEAD_MIRROR.to_string(),
            mirror_server_id: super::test_helpers::MIR_SERVER.to_string(),
            impersonation_endpoint_id: "wh-old".to_string(),
            impersonation_endpoint_secret: "secret".to_string(),
            awaiting_embed: false,
            rendered_content: "already mirrored".to_string(),
            processed_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let pipeline = Pipeline::new(h.state.clone());
    let live = message("17000000000000000009", SRC_CHAN, "the live message");
    pipeline
        .on_source_event(SourceEvent::MessageCreated(live))
        .await;

    // Recovery runs: forced sync, manual creation, commit, backfill.
    assert!(
        wait_until(
            || {
                h.control
                    .created_channels
                    .lock()
                    .iter()
                    .any(|c| c.name == "chess")
            },
            Duration::from_secs(120),
        )
        .await,
        "recovery never recreated the channel"
    );
    let recreated = h
        .control
        .created_channels
        .lock()
        .iter()
        .find(|c| c.name == "chess")
        .cloned()
        .unwrap();

    assert!(
        wait_until(
            || {
                h.endpoints
                    .endpoint_for_channel(&recreated.id)
                    .map(|e| e.sends.lock().len() == 3)
                    .unwrap_or(false)
            },
            Duration::from_secs(120),
        )
        .await,
        "live message plus two backfilled messages expected"
    );

    // The triggering message committed exactly once.
    assert!(
        h.store
            .find_processed("17000000000000000009")
            .await
            .unwrap()
            .is_some()
    );
    // Backfill deduped the already-processed id.
    let endpoint = h.endpoints.endpoint_for_channel(&recreated.id).unwrap();
    let contents: Vec<String> = endpoint
        .sends
        .lock()
        .iter()
        .map(|p| p.content.clone())
        .collect();
    assert!(contents.contains(&"first old message".to_string()));
    assert!(contents.contains(&"second old message".to_string()));
    assert!(!contents.contains(&"already mirrored".to_string()));

    // The operator sees a recovered notice in the error channel.
    assert!(
        wait_until(
            || {
                h.control.posted.lock().iter().any(|(chan, _, embed)| {
                    chan == "err-channel"
                        && embed
                            .as_ref()
                            .and_then(|e| e.title.as_deref())
                            .map(|t| t.contains("recovered"))
                            .unwrap_or(false)
                })
            },
            Duration::from_secs(60),
        )
        .await,
        "recovered notice never posted"
    );

    // The key sits in the dedupe set; nothing is left in flight.
    let key = recovery_key(SRC_CHAN, &h.state.pair.mirror_server_id);
    assert!(h.state.session.recently_recovered.contains(&key));
    assert_eq!(h.state.recovery.in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_recovery_in_flight_per_key() {
    let h = harness();
    let mut mapping = ChannelMapping::new(SRC_CHAN, SRC_SERVER, "chess", ChannelKind::Text);
    mapping.mirror_channel_id = Some(DEAD_MIRROR.to_string());
    h.store.upsert_channel(&mapping).await.unwrap();
    h.observation.seed_channel(SRC_CHAN, "chess", ChannelKind::Text);

    specular::core::recovery::trigger_recovery(h.state.clone(), SRC_CHAN.to_string(), None);
    specular::core::recovery::trigger_recovery(h.state.clone(), SRC_CHAN.to_string(), None);
    assert!(h.state.recovery.in_flight_count() <= 1);

    assert!(
        wait_until(|| h.state.recovery.in_flight_count() == 0, Duration::from_secs(120)).await
    );
    // Exactly one channel was created despite the double trigger.
    let created = h
        .control
        .created_channels
        .lock()
        .iter()
        .filter(|c| c.name == "chess")
        .count();
    assert_eq!(created, 1);
}

/// Attempt 2 against a 403 source blacklists instead of retrying.
#[tokio::test(start_paused = true)]
async fn test_recovery_blacklists_on_denied_access() {
    let h = harness();
    let mut mapping = ChannelMapping::new(SRC_CHAN, SRC_SERVER, "chess", ChannelKind::Text);
    mapping.mirror_channel_id = Some(DEAD_MIRROR.to_string());
    h.store.upsert_channel(&mapping).await.unwrap();
    h.observation.seed_channel(SRC_CHAN, "chess", ChannelKind::Text);
    h.observation.deny_access(SRC_CHAN);

    specular::core::recovery::trigger_recovery(h.state.clone(), SRC_CHAN.to_string(), None);
    assert!(
        wait_until(|| h.state.recovery.in_flight_count() == 0, Duration::from_secs(120)).await
    );

    let row = h.store.find_channel(SRC_CHAN, SRC_SERVER).await.unwrap().unwrap();
    assert!(row.blacklisted);
    assert!(row.blacklisted_until.is_some());
    assert_eq!(row.failed_attempts, 1);

    // No channel was created, and the key is muted for the session.
    assert!(
        !h.control
            .created_channels
            .lock()
            .iter()
            .any(|c| c.name == "chess")
    );
    let key = recovery_key(SRC_CHAN, &h.state.pair.mirror_server_id);
    assert!(h.state.session.failed_channels.contains(&key));
}
