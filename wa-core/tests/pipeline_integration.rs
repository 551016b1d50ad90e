// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! End-to-end tests driving a pipeline through signals and virtual time.

use serde_json::json;
use std::sync::Arc;

use wa_core::signal::FormInfo;
use wa_core::transport::Route;
use wa_core::{
    AgentConfig, BucketingStrategy, ElementInfo, ManualClock, MemoryCookieJar, MemoryStorage,
    Pipeline, RecordingTransport, SharedEnvironment, Signal, Storage, StorageScopes,
};

const START: u64 = 1_714_557_600_000;
const PAGE: &str = "https://shop.example.com/";
const MINUTE: u64 = 60_000;

struct Host {
    pipeline: Pipeline,
    clock: ManualClock,
    transport: RecordingTransport,
}

impl Host {
    fn new(config: AgentConfig, storage: StorageScopes) -> Self {
        let clock = ManualClock::new(START);
        let transport = RecordingTransport::new();
        let mut pipeline = Pipeline::builder(config)
            .with_storage(storage)
            .with_environment(Arc::new(SharedEnvironment::for_url(PAGE)))
            .with_clock(Arc::new(clock.clone()))
            .build(Arc::new(transport.clone()));
        pipeline.init();
        Self {
            pipeline,
            clock,
            transport,
        }
    }

    fn default_page() -> Self {
        Self::new(config(), StorageScopes::in_memory())
    }

    fn after(&mut self, delta_ms: u64, signal: Signal) {
        self.clock.advance(delta_ms);
        self.pipeline.handle(signal);
    }

    fn wait(&mut self, delta_ms: u64) {
        let now = self.clock.advance(delta_ms);
        self.pipeline.advance(now);
    }
}

fn config() -> AgentConfig {
    AgentConfig::for_page(PAGE).unwrap().with_rng_seed(42)
}

fn variants(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn scroll_to(top: f64) -> Signal {
    Signal::Scroll {
        x: 0.0,
        top,
        viewport_height: 500.0,
        document_height: 2000.0,
    }
}

fn text_input(value: &str) -> Signal {
    Signal::Input {
        target: ElementInfo::new("input").with_id("name"),
        value: value.to_string(),
    }
}

/// Test that the session survives short gaps and renews after the timeout
#[test]
fn test_session_stability_and_renewal() {
    let mut host = Host::default_page();
    host.clock.advance(10 * MINUTE);
    host.pipeline.track("first", None);
    host.clock.advance(31 * MINUTE);
    host.pipeline.track("second", None);

    let envelopes = host.transport.envelopes();
    assert_eq!(envelopes.len(), 3);
    assert_eq!(envelopes[0]["session_id"], envelopes[1]["session_id"]);
    assert_ne!(envelopes[1]["session_id"], envelopes[2]["session_id"]);
    assert_eq!(envelopes[0]["visitor_id"], envelopes[2]["visitor_id"]);
}

/// Test that an assignment sticks, also across pipelines sharing storage
#[test]
fn test_ab_assignment_is_sticky() {
    let storage = StorageScopes::in_memory();
    let mut host = Host::new(config(), storage.clone());
    let options = variants(&["control", "treatment"]);

    let first = host.pipeline.ab_get_variant("checkout", &options, None).unwrap();
    for _ in 0..20 {
        assert_eq!(
            host.pipeline.ab_get_variant("checkout", &options, Some(&[0.0, 1.0])),
            Some(first.clone())
        );
    }

    let mut reloaded = Host::new(config().with_rng_seed(9), storage);
    assert_eq!(
        reloaded.pipeline.ab_get_variant("checkout", &options, None),
        Some(first.clone())
    );

    let tests = reloaded.transport.of("ab_test");
    assert_eq!(tests[0]["ab_test"]["variant"], json!(first));
    assert_eq!(tests[0]["ab_tests"]["checkout"], json!(first));
}

/// Test that forcing, listing and clearing assignments behave
#[test]
fn test_ab_force_and_clear() {
    let mut host = Host::default_page();
    host.pipeline.ab_set_variant("hero", "b");
    host.pipeline.ab_set_variant("", "b");
    assert_eq!(host.pipeline.ab_all().get("hero").map(String::as_str), Some("b"));
    assert_eq!(host.pipeline.ab_get_variant("hero", &variants(&["a"]), None), None);

    let forced = host.transport.of("ab_test");
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0]["ab_test"]["forced"], true);

    host.pipeline.ab_clear(None);
    assert!(host.pipeline.ab_all().is_empty());
}

/// Test that hashed bucketing agrees across fresh stores for one visitor
#[test]
fn test_visitor_hash_bucketing_is_stable() {
    let pick = || {
        let storage = StorageScopes::in_memory();
        storage.persistent.set("wa_vid", "visitor-42").unwrap();
        let config = config()
            .with_cross_site(false, None)
            .with_bucketing(BucketingStrategy::VisitorHash);
        let mut host = Host::new(config, storage);
        host.pipeline
            .ab_get_variant("pricing", &variants(&["a", "b", "c", "d"]), None)
            .unwrap()
    };
    let first = pick();
    for _ in 0..5 {
        assert_eq!(pick(), first);
    }
}

/// Test three clicks close together produce one rage click
#[test]
fn test_rage_click_burst() {
    let mut host = Host::default_page();
    let button = ElementInfo::new("div").with_id("slow");
    for (i, pos) in [0.0, 10.0, 20.0].into_iter().enumerate() {
        host.after(
            if i == 0 { 0 } else { 200 },
            Signal::Click {
                x: pos,
                y: pos,
                element: Some(button.clone()),
                target: None,
            },
        );
    }

    host.after(
        100,
        Signal::Click {
            x: 25.0,
            y: 25.0,
            element: Some(button.clone()),
            target: None,
        },
    );

    let rage = host.transport.of("rage_click");
    assert_eq!(rage.len(), 1);
    assert_eq!(rage[0]["rage_click"]["count"], 3);
    assert_eq!(rage[0]["rage_click"]["x"], 20.0);
    assert_eq!(rage[0]["rage_click"]["element"]["id"], "slow");
    assert!(host.transport.of("click").is_empty());
}

/// Test the reset timer breaks a slow burst
#[test]
fn test_rage_click_timer_resets_count() {
    let mut host = Host::default_page();
    for delta in [0, 1100, 1100, 1100] {
        host.after(
            delta,
            Signal::Click {
                x: 5.0,
                y: 5.0,
                element: None,
                target: None,
            },
        );
    }
    assert!(host.transport.of("rage_click").is_empty());
}

/// Test cumulative layout shift windows through the web vitals report
#[test]
fn test_cls_session_windows() {
    let mut host = Host::default_page();
    for start_time in [0.0, 500.0, 1400.0, 6200.0] {
        host.after(
            0,
            Signal::LayoutShift {
                start_time,
                value: 0.1,
                had_recent_input: false,
            },
        );
    }
    host.after(
        0,
        Signal::LayoutShift {
            start_time: 6300.0,
            value: 0.5,
            had_recent_input: true,
        },
    );
    host.after(10, Signal::Visibility { hidden: true });

    let vitals = host.transport.of("webvitals");
    assert_eq!(vitals.len(), 1);
    assert_eq!(vitals[0]["web_vitals"]["cls"], 0.3);
}

/// Test milestones fire once and re-arm after SPA navigation
#[test]
fn test_scroll_milestones_reset_on_navigation() {
    let mut host = Host::default_page();
    host.after(0, scroll_to(200.0));
    host.after(30, scroll_to(500.0));
    host.wait(150);

    let milestones: Vec<_> = host
        .transport
        .of("scroll_milestone")
        .iter()
        .map(|e| e["scroll_milestone"]["milestone"].clone())
        .collect();
    assert_eq!(milestones, vec![json!(25), json!(50)]);

    host.after(0, scroll_to(500.0));
    host.wait(150);
    assert_eq!(host.transport.count("scroll_milestone"), 2);

    host.after(
        0,
        Signal::Navigate {
            url: "https://shop.example.com/cart".into(),
            title: None,
        },
    );
    host.after(0, scroll_to(500.0));
    host.wait(150);
    assert_eq!(host.transport.count("scroll_milestone"), 4);

    let spa = &host.transport.of("pageview")[1];
    assert_eq!(spa["spa"]["previous_url"], PAGE);
    assert_eq!(spa["page"]["path"], "/cart");
}

/// Test navigation cancels a pending scroll settle
#[test]
fn test_navigation_cancels_pending_scroll() {
    let mut host = Host::default_page();
    host.after(0, scroll_to(1500.0));
    host.after(
        50,
        Signal::Navigate {
            url: "https://shop.example.com/next".into(),
            title: Some("Next".into()),
        },
    );
    host.wait(1000);
    assert_eq!(host.transport.count("scroll_milestone"), 0);
}

/// Test an unchanged URL produces no page view
#[test]
fn test_unchanged_spa_url_is_ignored() {
    let mut host = Host::default_page();
    host.after(
        0,
        Signal::Navigate {
            url: PAGE.into(),
            title: None,
        },
    );
    assert_eq!(host.transport.events(), vec!["pageview"]);
}

/// Test the replay buffer flushes once it holds fifty events
#[test]
fn test_replay_flushes_at_capacity() {
    let mut host = Host::default_page();
    host.pipeline.replay_start();
    for i in 0..49 {
        host.after(10, text_input(&format!("v{}", i)));
    }

    let batches = host.transport.of("replay");
    assert_eq!(batches.len(), 1);
    let events = batches[0]["replay"]["events"].as_array().unwrap();
    assert_eq!(events.len(), 50);
    assert_eq!(events[0]["type"], "snapshot");
    assert_eq!(events[0]["data"]["viewport"]["w"], 1920);
    assert_eq!(events[49]["data"]["target"], "input#name");
    assert!(batches[0]["replay"]["session_id"].is_string());

    host.pipeline.replay_flush();
    assert_eq!(host.transport.count("replay"), 1);
}

/// Test the periodic replay flush and that stop cancels it
#[test]
fn test_replay_timer_flushes_and_stops() {
    let mut host = Host::default_page();
    host.pipeline.replay_start();
    host.after(100, text_input("hello"));
    host.wait(4900);
    assert_eq!(host.transport.count("replay"), 1);

    host.wait(5000);
    assert_eq!(host.transport.count("replay"), 1);

    host.after(10, text_input("again"));
    host.pipeline.replay_stop();
    assert_eq!(host.transport.count("replay"), 2);
    assert!(!host.pipeline.replay_is_active());
    assert_eq!(host.pipeline.pending_timers(), 0);

    host.after(10, text_input("ignored"));
    host.wait(60_000);
    assert_eq!(host.transport.count("replay"), 2);
}

/// Test password values are masked in replay
#[test]
fn test_replay_masks_passwords() {
    let mut host = Host::default_page();
    host.pipeline.replay_start();
    let mut password = ElementInfo::new("input").with_id("pw");
    password.input_type = Some("password".into());
    host.after(
        0,
        Signal::Input {
            target: password,
            value: "hunter2".into(),
        },
    );
    host.pipeline.replay_flush();

    let batch = &host.transport.of("replay")[0];
    assert_eq!(batch["replay"]["events"][1]["data"]["value"], "***");
}

/// Test mouse moves are throttled to the first move per window
#[test]
fn test_replay_mouse_throttle() {
    let mut host = Host::default_page();
    host.pipeline.replay_start();
    for step in 0..10u32 {
        host.after(
            10,
            Signal::MouseMove {
                x: f64::from(step),
                y: 0.0,
            },
        );
    }
    host.wait(100);
    host.pipeline.replay_flush();

    let batch = &host.transport.of("replay")[0];
    let mouse: Vec<_> = batch["replay"]["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["type"] == "mouse")
        .map(|e| e["data"]["x"].as_f64().unwrap())
        .collect();
    assert_eq!(mouse, vec![0.0, 5.0]);
}

/// Test a scroll burst is replayed at the position reached when the window closes
#[test]
fn test_replay_scroll_records_latest_position() {
    let mut host = Host::default_page();
    host.pipeline.replay_start();
    host.after(10, scroll_to(100.0));
    host.after(30, scroll_to(300.0));
    host.after(30, scroll_to(450.0));
    host.wait(100);
    host.pipeline.replay_flush();

    let batch = &host.transport.of("replay")[0];
    let scrolls: Vec<_> = batch["replay"]["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["type"] == "scroll")
        .map(|e| e["data"]["y"].as_f64().unwrap())
        .collect();
    assert_eq!(scrolls, vec![450.0]);
}

/// Test public operations are ignored once the pipeline is torn down
#[test]
fn test_operations_after_teardown_are_ignored() {
    let mut host = Host::default_page();
    host.pipeline.teardown();
    let sent = host.transport.sent().len();

    host.pipeline.replay_start();
    host.pipeline.track("late", None);
    host.pipeline.identify(Some("user-9"));
    let options = variants(&["control", "treatment"]);
    assert_eq!(host.pipeline.ab_get_variant("checkout", &options, None), None);
    host.pipeline.ab_set_variant("checkout", "control");
    host.wait(20_000);

    assert!(host.pipeline.is_torn_down());
    assert!(!host.pipeline.replay_is_active());
    assert_eq!(host.pipeline.pending_timers(), 0);
    assert_eq!(host.transport.sent().len(), sent);
    assert!(host.pipeline.ab_all().is_empty());
}

/// Test privacy mode never touches storage
#[test]
fn test_privacy_mode_writes_nothing() {
    let persistent = MemoryStorage::new();
    let ephemeral = MemoryStorage::new();
    let cookies = MemoryCookieJar::new();
    let storage = StorageScopes::new(
        Arc::new(persistent.clone()),
        Arc::new(ephemeral.clone()),
        Arc::new(cookies.clone()),
    );

    let mut host = Host::new(config().with_privacy_mode(true), storage);
    host.pipeline.track("signup", Some(json!({"plan": "pro"})));
    host.pipeline.identify(Some("user-1"));
    host.pipeline
        .ab_get_variant("hero", &variants(&["a", "b"]), None)
        .unwrap();
    host.pipeline.ab_set_variant("hero", "b");
    host.after(
        0,
        Signal::FieldFocus {
            form: FormInfo::new("f"),
            field: Default::default(),
        },
    );
    host.after(0, Signal::Unload);

    assert_eq!(persistent.write_count(), 0);
    assert_eq!(ephemeral.write_count(), 0);
    assert_eq!(cookies.write_count(), 0);

    assert!(host.transport.of("identify").is_empty());
    for envelope in host.transport.envelopes() {
        assert!(envelope["visitor_id"].is_null());
        assert!(envelope["session_id"].is_null());
        assert!(envelope["user_id"].is_null());
    }
}

/// Test custom events with and without a name
#[test]
fn test_custom_events() {
    let mut host = Host::default_page();
    host.pipeline.track("", Some(json!({"x": 1})));
    host.pipeline.track("signup", None);

    let custom = host.transport.of("custom");
    assert_eq!(custom.len(), 1);
    assert_eq!(custom[0]["custom"], json!({"name": "signup", "data": {}}));
}

/// Test identify sets and forgets the user id
#[test]
fn test_identify_round_trip() {
    let mut host = Host::default_page();
    host.pipeline.identify(Some("user-7"));
    host.pipeline.track("after-login", None);
    host.pipeline.identify(None);
    host.pipeline.track("after-logout", None);

    let custom = host.transport.of("custom");
    assert_eq!(custom[0]["user_id"], "user-7");
    assert!(custom[1]["user_id"].is_null());
    assert_eq!(host.transport.count("identify"), 2);
}

/// Test a resize burst settles into one event
#[test]
fn test_resize_burst_emits_once() {
    let mut host = Host::default_page();
    for (delta, width) in [(0, 1200), (100, 1000), (100, 800)] {
        host.after(delta, Signal::Resize { width, height: 700 });
    }
    host.wait(499);
    assert_eq!(host.transport.count("resize"), 0);
    host.wait(1);

    let resize = host.transport.of("resize");
    assert_eq!(resize.len(), 1);
    assert_eq!(resize[0]["resize"]["previous_width"], 1920);
    assert_eq!(resize[0]["resize"]["current_width"], 800);
    assert_eq!(resize[0]["screen"]["viewport_width"], 800);
}

/// Test nothing is delivered without a site id
#[test]
fn test_delivery_needs_endpoint_and_site() {
    let host = Host::new(AgentConfig::default(), StorageScopes::in_memory());
    assert!(host.transport.is_empty());
    assert_eq!(host.pipeline.delivery_stats().skipped, 1);
}

/// Test the POST fallback when the beacon refuses
#[test]
fn test_beacon_refusal_falls_back_to_post() {
    let mut host = Host::default_page();
    host.transport.refuse_beacons(true);
    host.pipeline.track("fallback", None);

    let sent = host.transport.sent();
    assert_eq!(sent[0].route, Route::Beacon);
    assert_eq!(sent[1].route, Route::Post);
    assert_eq!(sent[1].endpoint, "https://shop.example.com/api/v1/collect");
}

/// Test element visibility is reported on hide
#[test]
fn test_element_visibility_on_hide() {
    let mut host = Host::default_page();
    host.after(
        0,
        Signal::ElementObserved {
            id: "promo".into(),
            element: ElementInfo::new("section").with_id("promo"),
            track_duration: Some("promo-banner".into()),
        },
    );
    host.after(
        0,
        Signal::Intersection {
            id: "promo".into(),
            intersecting: true,
        },
    );
    host.after(1500, Signal::Visibility { hidden: true });

    let visible = host.transport.of("element_visibility");
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0]["element_visibility"]["selector"], "promo-banner");
    assert_eq!(visible[0]["element_visibility"]["visible_time_ms"], 1500);
}
