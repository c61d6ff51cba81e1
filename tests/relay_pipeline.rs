//! End-to-end relay ticks over the in-memory platform client.

mod common;

use std::sync::Arc;
use std::time::Duration;

use channel_relay::channels::{ChannelId, ChatRef, PlatformClient};
use channel_relay::clock::{Clock, ManualClock};
use channel_relay::pipeline::{DeliveryStrategy, FilterEngine, ForwardOutcome};
use channel_relay::relay::{Relay, StepOutcome};
use channel_relay::scheduler::CandidateScanner;
use channel_relay::store::{DedupStore, JsonFileMirror};

use common::*;

struct Harness {
    client: Arc<FakeClient>,
    clock: Arc<ManualClock>,
    relay: Relay,
}

fn harness(sources: &[&str], scanner: CandidateScanner) -> Harness {
    let client = FakeClient::new();
    let clock = Arc::new(ManualClock::new());
    let (store, _) = memory_store();
    let relay = build_relay(&client, &clock, store, sources, scanner);
    Harness {
        client,
        clock,
        relay,
    }
}

fn build_relay(
    client: &Arc<FakeClient>,
    clock: &Arc<ManualClock>,
    store: DedupStore,
    sources: &[&str],
    scanner: CandidateScanner,
) -> Relay {
    let platform: Arc<dyn PlatformClient> = client.clone();
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    Relay::new(
        platform,
        forwarder(client, clock, FilterEngine::permissive()),
        store,
        scanner,
        sources.iter().map(|s| channel(s)).collect(),
        dyn_clock,
    )
    .unwrap()
}

fn sent_outcome(step: &StepOutcome) -> bool {
    matches!(step, StepOutcome::Forwarded(o) if o.is_sent())
}

#[tokio::test]
async fn relay_requires_sources() {
    let client = FakeClient::new();
    let clock = Arc::new(ManualClock::new());
    let (store, _) = memory_store();
    let platform: Arc<dyn PlatformClient> = client.clone();
    let dyn_clock: Arc<dyn Clock> = clock.clone();

    let result = Relay::new(
        platform,
        forwarder(&client, &clock, FilterEngine::permissive()),
        store,
        CandidateScanner::default(),
        Vec::new(),
        dyn_clock,
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn round_robin_is_fair_when_one_channel_dominates() {
    let mut h = harness(&["@a", "@b", "@c"], CandidateScanner::default());
    let a = channel("@a");
    for id in 1..=6 {
        h.client
            .publish(&a, media_post(&a, id, &format!("post {id}"), photo(&format!("a{id}"))));
    }

    let mut visited = Vec::new();
    for _ in 0..9 {
        let report = h.relay.tick().await;
        if report.turn.channel == a {
            assert!(sent_outcome(&report.step), "A should yield on every turn");
        } else {
            assert_eq!(report.step, StepOutcome::NoCandidate);
        }
        visited.push(report.turn.channel.to_string());
    }

    assert_eq!(
        visited,
        ["@a", "@b", "@c", "@a", "@b", "@c", "@a", "@b", "@c"]
    );
    assert_eq!(h.client.sent().len(), 3);
    // A's cursor moves only on its own turns: the third candidate sat at
    // position 2, behind the two already posted.
    assert_eq!(h.relay.cursors().get(&a), Some(3));
    // B was rewound at the start of the pass, then nudged once.
    assert_eq!(h.relay.cursors().get(&channel("@b")), Some(1));
    assert_eq!(h.relay.rotation().idle_passes(), 0);
}

#[tokio::test]
async fn newest_messages_are_relayed_first_and_never_twice() {
    let mut h = harness(&["@a"], CandidateScanner::default());
    let a = channel("@a");
    for id in 1..=3 {
        h.client
            .publish(&a, media_post(&a, id, &format!("post {id}"), photo(&format!("a{id}"))));
    }

    for _ in 0..12 {
        h.relay.tick().await;
    }

    let texts: Vec<String> = h
        .client
        .sent()
        .iter()
        .map(|p| p.text.lines().next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(texts, vec!["post 3", "post 2", "post 1"]);
    assert_eq!(h.relay.store().stats().message_keys, 3);
}

#[tokio::test]
async fn scan_skips_text_only_and_foreign_messages() {
    let mut h = harness(&["@a"], CandidateScanner::default());
    let a = channel("@a");
    h.client.publish(&a, media_post(&a, 1, "wanted", photo("w")));
    let mut foreign = media_post(&a, 2, "forwarded from elsewhere", photo("f"));
    foreign.chat = ChatRef {
        id: -1_000,
        username: Some("someone_else".into()),
        title: None,
    };
    h.client.publish(&a, foreign);
    h.client.publish(&a, text_post(&a, 3, "just words"));

    let report = h.relay.tick().await;

    assert!(sent_outcome(&report.step));
    assert_eq!(h.client.sent().len(), 1);
    assert!(h.client.sent()[0].text.starts_with("wanted"));
    // Window is [text, foreign, wanted]: cursor lands just past the candidate.
    assert_eq!(h.relay.cursors().get(&a), Some(3));
}

fn publish_behind_fillers(client: &FakeClient, a: &ChannelId) {
    client.publish(a, media_post(a, 1, "deep", photo("deep")));
    client.publish(a, text_post(a, 2, "filler two"));
    client.publish(a, text_post(a, 3, "filler one"));
}

#[tokio::test]
async fn scan_budget_limits_how_far_one_visit_looks() {
    let mut h = harness(&["@a", "@b"], CandidateScanner::new(50, 2));
    let a = channel("@a");
    let b = channel("@b");
    publish_behind_fillers(&h.client, &a);
    h.client.publish(&b, media_post(&b, 1, "from b", photo("b1")));

    let first = h.relay.tick().await;
    assert_eq!(first.step, StepOutcome::NoCandidate);
    assert_eq!(h.relay.cursors().get(&a), Some(1));

    let second = h.relay.tick().await;
    assert!(sent_outcome(&second.step));

    // Back on A after a wraparound: rewound, so the budget again stops
    // short of the media post.
    let third = h.relay.tick().await;
    assert!(third.turn.new_pass);
    assert_eq!(third.step, StepOutcome::NoCandidate);
    assert_eq!(h.client.sent().len(), 1);

    // One more position of budget reaches it on the first visit.
    let mut wider = harness(&["@a"], CandidateScanner::new(50, 3));
    publish_behind_fillers(&wider.client, &a);
    let report = wider.relay.tick().await;
    assert!(sent_outcome(&report.step));
    assert!(wider.client.sent()[0].text.starts_with("deep"));
    assert_eq!(wider.relay.cursors().get(&a), Some(3));
}

#[tokio::test]
async fn empty_pass_is_reported_and_cursors_rewind() {
    let mut h = harness(&["@a", "@b"], CandidateScanner::default());
    let a = channel("@a");
    let b = channel("@b");
    h.client.publish(&a, text_post(&a, 1, "no media here"));
    h.client.publish(&b, text_post(&b, 1, "nor here"));

    let first = h.relay.tick().await;
    let second = h.relay.tick().await;
    assert!(!first.turn.new_pass && !second.turn.new_pass);
    assert_eq!(h.relay.cursors().get(&a), Some(1));
    assert_eq!(h.relay.cursors().get(&b), Some(1));

    let third = h.relay.tick().await;
    assert!(third.turn.new_pass);
    assert!(third.turn.previous_pass_idle);
    assert_eq!(h.relay.rotation().idle_passes(), 1);
    // Every cursor was rewound; A then advanced once on this visit.
    assert_eq!(h.relay.cursors().get(&a), Some(1));
    assert_eq!(h.relay.cursors().get(&b), Some(0));
}

#[tokio::test]
async fn productive_pass_also_rewinds_cursors() {
    let mut h = harness(&["@a", "@b"], CandidateScanner::default());
    let a = channel("@a");
    let b = channel("@b");
    h.client.publish(&a, media_post(&a, 1, "one", photo("one")));

    h.relay.tick().await;
    h.relay.tick().await;
    assert_eq!(h.relay.cursors().get(&b), Some(1));
    let third = h.relay.tick().await;

    assert!(third.turn.new_pass);
    assert!(!third.turn.previous_pass_idle);
    assert_eq!(h.relay.rotation().idle_passes(), 0);
    // A rescanned from the top and only found what it already posted.
    assert_eq!(third.step, StepOutcome::NoCandidate);
    assert_eq!(h.relay.cursors().get(&a), Some(1));
    assert_eq!(h.relay.cursors().get(&b), Some(0));
}

#[tokio::test]
async fn quiet_channel_is_not_starved_by_a_busy_neighbour() {
    let mut h = harness(&["@a", "@b"], CandidateScanner::default());
    let a = channel("@a");
    let b = channel("@b");
    for id in 1..=40 {
        h.client
            .publish(&a, media_post(&a, id, &format!("a post {id}"), photo(&format!("a{id}"))));
    }

    for _ in 0..24 {
        h.relay.tick().await;
    }
    assert_eq!(h.client.sent().len(), 12);

    h.client.publish(&b, media_post(&b, 1, "b finally speaks", photo("b1")));

    // A's turn, then B's: B is scanned from its newest message.
    h.relay.tick().await;
    let b_turn = h.relay.tick().await;
    assert_eq!(b_turn.turn.channel, b);
    assert!(sent_outcome(&b_turn.step));

    for _ in 0..18 {
        h.relay.tick().await;
    }
    let from_b = h
        .client
        .sent()
        .iter()
        .filter(|p| p.text.starts_with("b finally speaks"))
        .count();
    assert_eq!(from_b, 1);
    assert_eq!(h.relay.rotation().idle_passes(), 0);
}

#[tokio::test]
async fn exhausted_message_is_retried_on_a_later_sweep() {
    let mut h = harness(&["@a"], CandidateScanner::default());
    let a = channel("@a");
    h.client.publish(&a, media_post(&a, 1, "stubborn", photo("s")));
    h.client.fail(|f| {
        f.reference = true;
        f.upload = true;
        f.text = true;
    });

    let first = h.relay.tick().await;
    assert!(matches!(
        first.step,
        StepOutcome::Forwarded(ForwardOutcome::Exhausted { .. })
    ));

    assert_eq!(h.relay.cursors().get(&a), Some(1));

    h.client.fail(|f| *f = Failures::default());

    // The next sweep rewinds the cursor and brings the message back.
    let second = h.relay.tick().await;
    assert!(second.turn.new_pass);
    assert_eq!(
        second.step,
        StepOutcome::Forwarded(ForwardOutcome::Sent {
            strategy: DeliveryStrategy::RelayOriginal,
            plain_text: false
        })
    );
    assert_eq!(h.client.sent().len(), 1);
}

#[tokio::test]
async fn unreachable_source_is_skipped_without_moving_its_cursor() {
    let mut h = harness(&["@gone", "@a"], CandidateScanner::default());
    let gone = channel("@gone");
    let a = channel("@a");
    h.client.fail(|f| {
        f.unreachable.insert(gone.clone());
    });
    h.client.publish(&a, media_post(&a, 1, "still here", photo("here")));

    let first = h.relay.tick().await;
    assert!(matches!(first.step, StepOutcome::SourceFailed(_)));
    assert_eq!(h.relay.cursors().get(&gone), Some(0));

    let second = h.relay.tick().await;
    assert!(sent_outcome(&second.step));
    assert_eq!(h.client.fetches(), vec![gone, a]);
}

#[tokio::test]
async fn content_posted_in_two_sources_goes_out_once() {
    let mut h = harness(&["@a", "@b"], CandidateScanner::default());
    let a = channel("@a");
    let b = channel("@b");
    h.client.publish(&a, media_post(&a, 10, "Shared deal @a", photo("shared")));
    h.client.publish(&b, media_post(&b, 77, "Shared   deal https://t.me/b", photo("shared")));

    for _ in 0..6 {
        h.relay.tick().await;
    }

    assert_eq!(h.client.sent().len(), 1);
}

#[tokio::test]
async fn bootstrapped_target_content_is_not_reposted() {
    let client = FakeClient::new();
    let clock = Arc::new(ManualClock::new());
    let a = channel("@a");
    let target: ChannelId = channel(TARGET);

    // The target already shows this post (as relayed on an earlier run).
    client.publish(&target, media_post(&target, 500, "Old news", photo("old")));
    client.publish(&a, media_post(&a, 1, "Old news @a", photo("old")));
    client.publish(&a, media_post(&a, 2, "Fresh news", photo("fresh")));

    let (mut store, mirror) = memory_store();
    let existing = client.fetch_recent_messages(&target, 100).await.unwrap();
    assert_eq!(store.bootstrap(&existing).await, 1);
    assert_eq!(mirror.saved().len(), 1);

    let mut relay = build_relay(&client, &clock, store, &["@a"], CandidateScanner::default());
    for _ in 0..4 {
        relay.tick().await;
    }

    let sent = client.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.starts_with("Fresh news"));
}

#[tokio::test]
async fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("fingerprints.json");
    let client = FakeClient::new();
    let a = channel("@a");
    client.publish(&a, media_post(&a, 1, "Only once", photo("once")));

    {
        let clock = Arc::new(ManualClock::new());
        let store = DedupStore::load(Box::new(JsonFileMirror::new(&path)), 100).await;
        let mut relay = build_relay(&client, &clock, store, &["@a"], CandidateScanner::default());
        relay.tick().await;
    }
    assert_eq!(client.sent().len(), 1);

    // Message keys are not persisted; the content fingerprint is.
    let clock = Arc::new(ManualClock::new());
    let store = DedupStore::load(Box::new(JsonFileMirror::new(&path)), 100).await;
    assert_eq!(store.stats().fingerprints, 1);
    let mut relay = build_relay(&client, &clock, store, &["@a"], CandidateScanner::default());
    for _ in 0..3 {
        relay.tick().await;
    }
    assert_eq!(client.sent().len(), 1);
}

#[tokio::test]
async fn live_messages_are_forwarded_before_the_scheduler_step() {
    let mut h = harness(&["@a"], CandidateScanner::default());
    let a = channel("@a");
    let stream = h.client.subscribe(std::slice::from_ref(&a)).await.unwrap();
    h.relay = build_relay(
        &h.client,
        &h.clock,
        memory_store().0,
        &["@a"],
        CandidateScanner::default(),
    )
    .with_live(stream);

    h.client.push_live(text_post(&a, 40, "Breaking, text only"));
    h.client.push_live(text_post(&channel("@stranger"), 41, "Not ours"));

    let report = h.relay.tick().await;

    assert_eq!(report.live.len(), 1);
    assert!(report.live[0].is_sent());
    assert_eq!(report.step, StepOutcome::NoCandidate);
    assert_eq!(report.sent(), 1);
    assert!(!report.is_idle());
    let sent = h.client.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.starts_with("Breaking, text only"));
}

#[tokio::test]
async fn ended_live_stream_does_not_stop_the_relay() {
    let mut h = harness(&["@a"], CandidateScanner::default());
    let a = channel("@a");
    let stream = h.client.subscribe(std::slice::from_ref(&a)).await.unwrap();
    h.relay = build_relay(
        &h.client,
        &h.clock,
        memory_store().0,
        &["@a"],
        CandidateScanner::default(),
    )
    .with_live(stream);
    h.client.close_live();
    h.client.publish(&a, media_post(&a, 1, "history", photo("h")));

    let report = h.relay.tick().await;
    assert!(report.live.is_empty());
    assert!(sent_outcome(&report.step));
}

#[tokio::test]
async fn each_post_is_followed_by_the_post_delay() {
    let mut h = harness(&["@a", "@b"], CandidateScanner::default());
    let a = channel("@a");
    let b = channel("@b");
    h.client.publish(&a, media_post(&a, 1, "from a", photo("pa")));
    h.client.publish(&b, media_post(&b, 1, "from b", photo("pb")));

    let first = h.relay.tick().await;
    let second = h.relay.tick().await;
    let third = h.relay.tick().await;

    assert_eq!(first.sent() + second.sent(), 2);
    assert!(third.is_idle());
    assert_eq!(h.clock.sleeps(), vec![POST_DELAY, POST_DELAY]);
    assert_eq!(h.clock.elapsed(), Duration::from_secs(120));
}

#[tokio::test]
async fn run_recovers_from_a_panicking_tick_and_waits_when_idle() {
    let idle = Duration::from_secs(5);
    let h = harness(&["@a"], CandidateScanner::default());
    let a = channel("@a");
    h.client
        .publish(&a, media_post(&a, 1, "after the panic", photo("p")));
    h.client.fail(|f| f.panic_next_fetch = true);

    let relay = h.relay.with_idle_wait(idle);
    let stopped = tokio::time::timeout(Duration::from_millis(50), relay.run()).await;
    assert!(stopped.is_err(), "run only ends when cancelled");

    let sent = h.client.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.starts_with("after the panic"));

    // Panicked tick, then the post, then nothing left to do.
    let sleeps = h.clock.sleeps();
    assert!(sleeps.len() > 2);
    assert_eq!(sleeps[0], idle);
    assert_eq!(sleeps[1], POST_DELAY);
    assert!(sleeps[2..].iter().all(|d| *d == idle));
}
