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

//! The runtime context.
//!
//! [`Pipeline`] owns every component: identity, session, experiments, the
//! aggregators, the replay buffer, the taps, the scheduler and delivery.
//! It is driven entirely by its host:
//!
//! - [`Pipeline::init`] once the page has loaded,
//! - [`Pipeline::handle`] for every raw [`Signal`],
//! - [`Pipeline::advance`] to let virtual time pass,
//! - [`Pipeline::on_visibility_change`] and [`Pipeline::teardown`] for the
//!   hide and unload flushes.
//!
//! Handlers run with `&mut self` on a single thread. Before each signal or
//! public operation the pipeline catches up with its [`Clock`], so every
//! timer due by then fires first, in deadline order.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::aggregators::{
    scroll::scroll_depth, ActiveTimeTracker, Emission, FormFunnel, LongTaskFilter,
    OfflineTracker, OrientationTracker, RageClickDetector, ResizeTracker, ScrollTracker,
    VisibilityRegistry, WebVitals,
};
use crate::clock::{Clock, SystemClock};
use crate::config::AgentConfig;
use crate::envelope::{payload, EnvelopeBuilder, Payload};
use crate::environment::{Environment, SharedEnvironment};
use crate::error_reports::{csp_payload, error_payload, rejection_payload, resource_error_payload};
use crate::experiments::{ABBucketer, Assignments};
use crate::identity::IdentityStore;
use crate::interactions::{click_payload, copy_payload, download_payload, right_click_payload};
use crate::intercept::{
    console_payload, request_payload, should_track_request, Interceptors, NoopTapHost, TapHost,
    TapKind,
};
use crate::replay::{mask_input, ReplayBatch, ReplayBuffer, ReplayKind};
use crate::scheduler::{Scheduler, TimerToken};
use crate::session::SessionTracker;
use crate::signal::{selector_or_body, Command, ElementInfo, MutationKind, Signal};
use crate::storage::StorageScopes;
use crate::transport::{Delivery, DeliveryStats, DeliveryTransport, Transport};

/// Observer primitives the host provides. Aggregators that need a missing
/// capability stay inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostCapabilities {
    pub performance_observer: bool,
    pub intersection_observer: bool,
    pub mutation_observer: bool,
    pub beacon: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            performance_observer: true,
            intersection_observer: true,
            mutation_observer: true,
            beacon: true,
        }
    }
}

impl HostCapabilities {
    /// A host with none of the optional primitives.
    pub fn minimal() -> Self {
        Self {
            performance_observer: false,
            intersection_observer: false,
            mutation_observer: false,
            beacon: false,
        }
    }
}

/// Capability-gated or switchable parts of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    WebVitals,
    LongTasks,
    ElementVisibility,
    ImageVisibility,
    Beacon,
    Replay,
    ReplayMutations,
    ConsoleTap,
    NetworkTap,
}

/// Deferred work owned by the scheduler.
#[derive(Debug, Clone, PartialEq)]
enum Task {
    ScrollSettle {
        top: f64,
        viewport_height: f64,
        document_height: f64,
    },
    RageClickReset,
    ResizeSettle {
        width: u32,
        height: u32,
    },
    ReplayFlush,
    ReplayMouse {
        x: f64,
        y: f64,
    },
    ReplayScroll,
}

#[derive(Debug, Default)]
struct Timers {
    scroll: Option<TimerToken>,
    rage_click: Option<TimerToken>,
    resize: Option<TimerToken>,
    replay_flush: Option<TimerToken>,
    replay_mouse: Option<TimerToken>,
    replay_scroll: Option<TimerToken>,
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: AgentConfig,
    storage: Option<StorageScopes>,
    environment: Option<Arc<dyn Environment>>,
    clock: Option<Arc<dyn Clock>>,
    capabilities: HostCapabilities,
    tap_host: Option<Arc<dyn TapHost>>,
}

impl PipelineBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            storage: None,
            environment: None,
            clock: None,
            capabilities: HostCapabilities::default(),
            tap_host: None,
        }
    }

    /// Storage scopes. Defaults to fresh in-memory stores.
    pub fn with_storage(mut self, storage: StorageScopes) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Clock. Defaults to the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_capabilities(mut self, capabilities: HostCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_tap_host(mut self, tap_host: Arc<dyn TapHost>) -> Self {
        self.tap_host = Some(tap_host);
        self
    }

    /// Build an uninitialised pipeline delivering through `transport`.
    pub fn build(self, transport: Arc<dyn Transport>) -> Pipeline {
        let config = self.config;
        let storage = self.storage.unwrap_or_else(StorageScopes::in_memory);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(SharedEnvironment::for_url("about:blank")) as Arc<dyn Environment>);
        let tap_host = self
            .tap_host
            .unwrap_or_else(|| Arc::new(NoopTapHost) as Arc<dyn TapHost>);
        let timing = config.timing.clone();
        let privacy = config.privacy_mode;
        let now = clock.now_ms();

        let identity = IdentityStore::new(
            storage.persistent.clone(),
            storage.cookies.clone(),
            privacy,
            config.cross_site,
            config.cross_site_domain.clone(),
        );
        let session = SessionTracker::new(storage.ephemeral.clone(), timing.session_timeout_ms, privacy);
        let builder = EnvelopeBuilder::new(config.site_id.clone(), identity, session, environment.clone());
        let delivery = DeliveryTransport::new(
            config.endpoint.clone(),
            config.site_id.clone(),
            self.capabilities.beacon,
            transport,
        );
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Pipeline {
            experiments: ABBucketer::new(storage.persistent.clone(), privacy, config.bucketing),
            capabilities: self.capabilities,
            clock,
            environment,
            builder,
            delivery,
            rng,
            scheduler: Scheduler::new(),
            timers: Timers::default(),
            now_ms: now,
            rage_clicks: RageClickDetector::new(timing.rage_click_threshold, timing.rage_click_radius_px),
            scroll: ScrollTracker::new(),
            scroll_position: (0.0, 0.0),
            vitals: WebVitals::new(timing.inp_threshold_ms),
            active_time: ActiveTimeTracker::new(now),
            forms: FormFunnel::new(),
            offline: OfflineTracker::new(true, now),
            visibility: VisibilityRegistry::new(),
            resize: ResizeTracker::new(0, 0),
            orientation: OrientationTracker::new(None),
            long_tasks: LongTaskFilter::new(timing.long_task_threshold_ms),
            replay: ReplayBuffer::new(timing.replay_buffer_size),
            taps: Interceptors::new(tap_host),
            last_url: String::new(),
            initialized: false,
            torn_down: false,
            config,
        }
    }
}

pub struct Pipeline {
    config: AgentConfig,
    capabilities: HostCapabilities,
    clock: Arc<dyn Clock>,
    environment: Arc<dyn Environment>,
    builder: EnvelopeBuilder,
    delivery: DeliveryTransport,
    experiments: ABBucketer,
    rng: StdRng,
    scheduler: Scheduler<Task>,
    timers: Timers,
    /// Virtual now; never moves backwards.
    now_ms: u64,

    rage_clicks: RageClickDetector,
    scroll: ScrollTracker,
    scroll_position: (f64, f64),
    vitals: WebVitals,
    active_time: ActiveTimeTracker,
    forms: FormFunnel,
    offline: OfflineTracker,
    visibility: VisibilityRegistry,
    resize: ResizeTracker,
    orientation: OrientationTracker,
    long_tasks: LongTaskFilter,
    replay: ReplayBuffer,
    taps: Interceptors,

    last_url: String,
    initialized: bool,
    torn_down: bool,
}

impl Pipeline {
    pub fn builder(config: AgentConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn delivery_stats(&self) -> DeliveryStats {
        self.delivery.stats()
    }

    /// Scheduler entries still waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.scheduler.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn is_active(&self, feature: Feature) -> bool {
        let caps = &self.capabilities;
        match feature {
            Feature::WebVitals | Feature::LongTasks => caps.performance_observer,
            Feature::ElementVisibility | Feature::ImageVisibility => caps.intersection_observer,
            Feature::Beacon => caps.beacon,
            Feature::Replay => self.replay.is_active(),
            Feature::ReplayMutations => self.replay.is_active() && caps.mutation_observer,
            Feature::ConsoleTap => self.taps.is_installed(TapKind::Console),
            Feature::NetworkTap => self.taps.is_installed(TapKind::Network),
        }
    }

    /// Load persisted state, capture the starting context and send the
    /// initial page view. Later calls are ignored.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        let now = self.clock.now_ms().max(self.now_ms);
        self.now_ms = now;

        self.experiments.load();
        self.offline = OfflineTracker::new(self.environment.is_online(), now);
        self.active_time = ActiveTimeTracker::new(now);

        let snapshot = self.environment.snapshot();
        self.last_url = snapshot.page.url.clone();
        self.resize = ResizeTracker::new(snapshot.screen.viewport_width, snapshot.screen.viewport_height);
        self.orientation = OrientationTracker::new(self.environment.orientation());

        let timing = self.environment.navigation_timing();
        if let (Some(timing), true) = (&timing, self.is_active(Feature::WebVitals)) {
            self.vitals.navigation(timing.response_start);
        }
        let performance = timing.map_or_else(|| json!({}), |t| t.performance());
        self.dispatch("pageview", payload("performance", performance));

        info!(
            site_id = ?self.config.site_id,
            url = %self.last_url,
            privacy_mode = self.config.privacy_mode,
            "analytics pipeline initialised"
        );
    }

    /// Fire every timer due at or before `now_ms`, then move virtual time
    /// to `now_ms`. Earlier instants are ignored.
    pub fn advance(&mut self, now_ms: u64) {
        while let Some(fired) = self.scheduler.pop_due(now_ms) {
            self.now_ms = self.now_ms.max(fired.due_ms);
            self.run_task(fired.task);
        }
        self.now_ms = self.now_ms.max(now_ms);
    }

    fn sync(&mut self) {
        let now = self.clock.now_ms();
        self.advance(now);
    }

    fn run_task(&mut self, task: Task) {
        trace!(?task, at = self.now_ms, "timer fired");
        match task {
            Task::ScrollSettle {
                top,
                viewport_height,
                document_height,
            } => {
                self.timers.scroll = None;
                let depth = scroll_depth(top, viewport_height, document_height);
                for emission in self.scroll.observe(depth) {
                    self.emit(emission);
                }
            }
            Task::RageClickReset => {
                self.timers.rage_click = None;
                self.rage_clicks.reset();
            }
            Task::ResizeSettle { width, height } => {
                self.timers.resize = None;
                if let Some(emission) = self.resize.settle(width, height) {
                    self.emit(emission);
                }
            }
            Task::ReplayFlush => self.flush_replay(),
            Task::ReplayMouse { x, y } => {
                self.timers.replay_mouse = None;
                self.record_replay(ReplayKind::Mouse, json!({ "x": x, "y": y }));
            }
            Task::ReplayScroll => {
                self.timers.replay_scroll = None;
                let (x, y) = self.scroll_position;
                self.record_replay(ReplayKind::Scroll, json!({ "x": x, "y": y }));
            }
        }
    }

    fn dispatch(&self, event: &str, payload: Payload) -> Delivery {
        let envelope = self
            .builder
            .build(event, self.now_ms, self.experiments.active(), payload);
        let delivery = self.delivery.send(&envelope);
        trace!(event, ?delivery, "envelope dispatched");
        delivery
    }

    fn emit(&self, emission: Emission) {
        self.dispatch(emission.event, emission.payload);
    }

    fn page_url(&self) -> String {
        self.environment.snapshot().page.url
    }

    /// Process one raw host notification.
    pub fn handle(&mut self, signal: Signal) {
        if self.torn_down {
            trace!("signal after teardown ignored");
            return;
        }
        self.sync();
        self.environment.observe(&signal);
        trace!(?signal, "signal");
        let now = self.now_ms;

        match signal {
            Signal::Navigate { url, .. } => self.navigate(url),
            Signal::Click {
                x,
                y,
                element,
                target,
            } => self.click(x, y, element, target),
            Signal::RightClick { x, y, element } => {
                let body = right_click_payload(&element, x, y, &self.page_url());
                self.dispatch("right_click", payload("right_click", body));
            }
            Signal::MouseMove { x, y } => {
                if self.replay.is_active() {
                    let delay = self.config.timing.replay_mouse_throttle_ms;
                    self.scheduler
                        .throttle(&mut self.timers.replay_mouse, now, delay, Task::ReplayMouse { x, y });
                }
            }
            Signal::Scroll {
                x,
                top,
                viewport_height,
                document_height,
            } => {
                self.scroll_position = (x, top);
                self.active_time.activity(now);
                let delay = self.config.timing.scroll_debounce_ms;
                self.scheduler.debounce(
                    &mut self.timers.scroll,
                    now,
                    delay,
                    Task::ScrollSettle {
                        top,
                        viewport_height,
                        document_height,
                    },
                );
                if self.replay.is_active() {
                    let delay = self.config.timing.replay_scroll_throttle_ms;
                    self.scheduler.throttle(
                        &mut self.timers.replay_scroll,
                        now,
                        delay,
                        Task::ReplayScroll,
                    );
                }
            }
            Signal::Activity { .. } => self.active_time.activity(now),
            Signal::Input { target, value } => {
                if ["input", "textarea", "select"].iter().any(|tag| target.is(tag)) {
                    let value = mask_input(target.input_type.as_deref(), &value);
                    self.record_replay(
                        ReplayKind::Input,
                        json!({ "target": target.selector(), "value": value }),
                    );
                }
            }
            Signal::FieldFocus { form, field } => {
                if let Some(emission) = self.forms.focus(&form, &field, now) {
                    self.emit(emission);
                }
            }
            Signal::FormSubmit { form } => {
                let emission = self.forms.submit(&form, now);
                self.emit(emission);
            }
            Signal::FormRemoved { form_id } => self.forms.detach(&form_id),
            Signal::Resize { width, height } => {
                let delay = self.config.timing.resize_debounce_ms;
                self.scheduler.debounce(
                    &mut self.timers.resize,
                    now,
                    delay,
                    Task::ResizeSettle { width, height },
                );
                self.record_replay(ReplayKind::Resize, json!({ "w": width, "h": height }));
            }
            Signal::Orientation { orientation, angle } => {
                if let Some(emission) = self.orientation.change(orientation, angle) {
                    self.emit(emission);
                }
            }
            Signal::Visibility { hidden } => self.visibility_changed(hidden),
            Signal::Unload => self.shutdown(),
            Signal::Connectivity { online, .. } => self.connectivity(online),
            Signal::LayoutShift {
                start_time,
                value,
                had_recent_input,
            } if self.is_active(Feature::WebVitals) => {
                self.vitals.layout_shift(start_time, value, had_recent_input)
            }
            Signal::LargestContentfulPaint { start_time } if self.is_active(Feature::WebVitals) => {
                self.vitals.largest_contentful_paint(start_time)
            }
            Signal::FirstInput {
                start_time,
                processing_start,
            } if self.is_active(Feature::WebVitals) => {
                self.vitals.first_input(start_time, processing_start)
            }
            Signal::EventTiming {
                interaction_id,
                duration,
            } if self.is_active(Feature::WebVitals) => {
                self.vitals.event_timing(interaction_id, duration)
            }
            Signal::Paint { name, start_time } if self.is_active(Feature::WebVitals) => {
                self.vitals.paint(&name, start_time)
            }
            Signal::LongTask {
                duration,
                start_time,
                name,
                attribution,
            } if self.is_active(Feature::LongTasks) => {
                if let Some(emission) =
                    self.long_tasks
                        .observe(duration, start_time, &name, attribution.as_ref())
                {
                    self.emit(emission);
                }
            }
            Signal::ElementObserved {
                id,
                element,
                track_duration,
            } if self.is_active(Feature::ElementVisibility) => {
                self.visibility
                    .register(id, &element, track_duration.as_deref())
            }
            Signal::ElementRemoved { id } => self.visibility.remove(&id),
            Signal::Intersection { id, intersecting } if self.is_active(Feature::ElementVisibility) => {
                self.visibility.intersect(&id, intersecting, now)
            }
            Signal::ImageIntersection {
                id,
                image,
                intersecting,
            } if self.is_active(Feature::ImageVisibility) => {
                if let Some(emission) = self.visibility.image_intersection(&id, &image, intersecting) {
                    self.emit(emission);
                }
            }
            Signal::Error {
                message,
                source,
                line,
                column,
                error,
            } => {
                let body = error_payload(&message, source.as_deref(), line, column, error.as_ref());
                self.dispatch("error", payload("error", body));
            }
            Signal::UnhandledRejection { reason } => {
                self.dispatch("error", payload("error", rejection_payload(&reason)));
            }
            Signal::ResourceError { element } => {
                let body = resource_error_payload(&element);
                self.dispatch("resource_error", payload("resource", body));
            }
            Signal::CspViolation(violation) => {
                self.dispatch("csp_violation", payload("csp", csp_payload(&violation)));
            }
            Signal::Print => {
                self.dispatch("print", Payload::new());
            }
            Signal::Copy { selection } => {
                if let Some(body) = copy_payload(&selection) {
                    self.dispatch("copy", payload("copy", body));
                }
            }
            Signal::DomMutation {
                kind,
                target,
                node,
                attr,
            } if self.is_active(Feature::ReplayMutations) => {
                let target = selector_or_body(target.as_ref());
                let (kind, data) = match kind {
                    MutationKind::Add => (
                        ReplayKind::DomAdd,
                        json!({ "target": target, "node": node.unwrap_or_else(|| "text".into()) }),
                    ),
                    MutationKind::Remove => (
                        ReplayKind::DomRemove,
                        json!({ "target": target, "node": node.unwrap_or_else(|| "text".into()) }),
                    ),
                    MutationKind::Attr => (ReplayKind::DomAttr, json!({ "target": target, "attr": attr })),
                };
                self.record_replay(kind, data);
            }
            Signal::Console { level, args } if self.is_active(Feature::ConsoleTap) => {
                self.dispatch("console", payload("console", console_payload(level, &args, now)));
            }
            Signal::NetworkRequest(request) if self.is_active(Feature::NetworkTap) => {
                let page_url = self.page_url();
                if should_track_request(&request.url, &page_url, self.config.endpoint.as_deref()) {
                    let body = request_payload(&request, now);
                    self.dispatch("network_request", payload("network_request", body));
                }
            }
            ignored => trace!(?ignored, "signal for inactive aggregator dropped"),
        }
    }

    /// Apply a recorded public operation.
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::Track { name, data } => self.track(&name, Some(data)),
            Command::Identify { user_id } => self.identify(user_id.as_deref()),
            Command::AbGetVariant {
                name,
                variants,
                weights,
            } => {
                self.ab_get_variant(&name, &variants, weights.as_deref());
            }
            Command::AbSetVariant { name, variant } => self.ab_set_variant(&name, &variant),
            Command::AbClear { name } => self.ab_clear(name.as_deref()),
            Command::ReplayStart => self.replay_start(),
            Command::ReplayStop => self.replay_stop(),
            Command::ReplayFlush => self.replay_flush(),
            Command::ConsoleStart => self.console_start(),
            Command::ConsoleStop => self.console_stop(),
            Command::NetworkStart => self.network_start(),
            Command::NetworkStop => self.network_stop(),
        }
    }

    fn navigate(&mut self, url: String) {
        if url == self.last_url {
            return;
        }
        let previous_url = std::mem::replace(&mut self.last_url, url);
        self.scheduler.cancel_slot(&mut self.timers.scroll);
        self.scroll.reset();
        debug!(from = %previous_url, to = %self.last_url, "SPA navigation");
        self.dispatch(
            "pageview",
            payload("spa", json!({ "navigation": true, "previous_url": previous_url })),
        );
    }

    fn click(&mut self, x: f64, y: f64, element: Option<ElementInfo>, target: Option<ElementInfo>) {
        let now = self.now_ms;

        let summary = element.as_ref().map(ElementInfo::summary);
        if let Some(emission) = self.rage_clicks.click(x, y, summary) {
            self.emit(emission);
        }
        let timeout = self.config.timing.rage_click_timeout_ms;
        self.scheduler
            .debounce(&mut self.timers.rage_click, now, timeout, Task::RageClickReset);

        if let Some(target) = &target {
            let page_url = self.page_url();
            if let Some(body) = download_payload(target, &page_url) {
                self.dispatch("download", payload("download", body));
            }
            let (event, body) = click_payload(target, x, y, &page_url);
            self.dispatch(event, payload("click", body));
        }

        self.record_replay(
            ReplayKind::Click,
            json!({ "x": x, "y": y, "target": selector_or_body(element.as_ref()) }),
        );
    }

    fn connectivity(&mut self, online: bool) {
        if let Some(emission) = self.offline.transition(online, self.now_ms) {
            self.emit(emission);
        }
        let status = if online { "online" } else { "offline" };
        let connection = self.environment.snapshot().connection;
        self.dispatch(
            status,
            payload("network", json!({ "status": status, "connection": connection })),
        );
    }

    fn report_element_visibility(&self) {
        let min = self.config.timing.visibility_min_ms;
        for emission in self.visibility.report(self.now_ms, min) {
            self.emit(emission);
        }
    }

    fn report_page_summaries(&mut self) {
        if let Some(emission) = self.scroll.summary() {
            self.emit(emission);
        }
        if let Some(emission) = self.vitals.take_report() {
            self.emit(emission);
        }
        if let Some(emission) = self.active_time.take_report(self.now_ms) {
            self.emit(emission);
        }
    }

    /// The host's page visibility changed.
    pub fn on_visibility_change(&mut self, hidden: bool) {
        if self.torn_down {
            return;
        }
        self.sync();
        self.visibility_changed(hidden);
    }

    fn visibility_changed(&mut self, hidden: bool) {
        self.active_time.visibility_changed(hidden, self.now_ms);
        if !hidden {
            return;
        }
        self.report_element_visibility();
        self.report_page_summaries();
        self.flush_replay();
    }

    /// Final flush on unload: visibility, abandoned forms, page summaries
    /// and replay. Cancels every timer and restores the taps.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.sync();
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.report_element_visibility();
        for emission in self.forms.abandon_all(self.now_ms) {
            self.emit(emission);
        }
        self.report_page_summaries();
        self.flush_replay();

        self.scheduler.clear();
        self.timers = Timers::default();
        self.taps.stop_all();
        self.torn_down = true;
        debug!(stats = ?self.delivery.stats(), "pipeline torn down");
    }

    /// Send a custom event. Empty names are ignored; missing data becomes `{}`.
    pub fn track(&mut self, name: &str, data: Option<Value>) {
        if self.torn_down || name.is_empty() {
            return;
        }
        self.sync();
        let data = match data {
            None | Some(Value::Null) => json!({}),
            Some(data) => data,
        };
        self.dispatch("custom", payload("custom", json!({ "name": name, "data": data })));
    }

    /// Set or forget the user id. Ignored under privacy mode.
    pub fn identify(&mut self, user_id: Option<&str>) {
        if self.torn_down {
            return;
        }
        self.sync();
        if !self.builder.identity_mut().identify(user_id) {
            return;
        }
        self.dispatch("identify", payload("identify", json!({ "user_id": user_id })));
    }

    /// Sticky variant for `name`. `None` for an empty name or fewer than
    /// two variants.
    pub fn ab_get_variant(&mut self, name: &str, variants: &[String], weights: Option<&[f64]>) -> Option<String> {
        if self.torn_down {
            return None;
        }
        self.sync();
        let visitor_id = self.builder.identity().resolve_visitor_id();
        let variant = self.experiments.get_variant(
            name,
            variants,
            weights,
            &mut self.rng,
            visitor_id.as_deref(),
        )?;
        self.dispatch(
            "ab_test",
            payload(
                "ab_test",
                json!({ "test_name": name, "variant": variant, "variants": variants }),
            ),
        );
        Some(variant)
    }

    pub fn ab_set_variant(&mut self, name: &str, variant: &str) {
        if self.torn_down {
            return;
        }
        self.sync();
        if !self.experiments.set_variant(name, variant) {
            return;
        }
        self.dispatch(
            "ab_test",
            payload(
                "ab_test",
                json!({ "test_name": name, "variant": variant, "forced": true }),
            ),
        );
    }

    pub fn ab_all(&self) -> Assignments {
        self.experiments.all()
    }

    pub fn ab_clear(&mut self, name: Option<&str>) {
        if self.torn_down {
            return;
        }
        self.experiments.clear(name);
    }

    fn record_replay(&mut self, kind: ReplayKind, data: Value) {
        if let Some(batch) = self.replay.record(self.now_ms, kind, data) {
            self.send_replay(batch);
        }
    }

    fn send_replay(&self, batch: ReplayBatch) {
        debug!(events = batch.events.len(), "sending replay batch");
        self.dispatch("replay", payload("replay", batch.payload()));
    }

    fn flush_replay(&mut self) {
        if let Some(batch) = self.replay.flush() {
            self.send_replay(batch);
        }
    }

    /// Start interaction capture with a fresh replay session. No-op while
    /// already capturing.
    pub fn replay_start(&mut self) {
        if self.torn_down {
            return;
        }
        self.sync();
        if !self.replay.start() {
            return;
        }
        let snapshot = self.environment.snapshot();
        let (scroll_x, scroll_y) = self.scroll_position;
        self.record_replay(
            ReplayKind::Snapshot,
            json!({
                "url": snapshot.page.url,
                "title": snapshot.page.title,
                "viewport": {
                    "w": snapshot.screen.viewport_width,
                    "h": snapshot.screen.viewport_height,
                },
                "scroll": { "x": scroll_x, "y": scroll_y },
            }),
        );
        let interval = self.config.timing.replay_flush_interval_ms;
        self.scheduler.cancel_slot(&mut self.timers.replay_flush);
        self.timers.replay_flush = Some(self.scheduler.schedule_repeating(self.now_ms, interval, Task::ReplayFlush));
    }

    /// Flush, stop capture and cancel the replay timers.
    pub fn replay_stop(&mut self) {
        if self.torn_down {
            return;
        }
        self.sync();
        if !self.replay.is_active() {
            return;
        }
        if let Some(batch) = self.replay.stop() {
            self.send_replay(batch);
        }
        self.scheduler.cancel_slot(&mut self.timers.replay_flush);
        self.scheduler.cancel_slot(&mut self.timers.replay_mouse);
        self.scheduler.cancel_slot(&mut self.timers.replay_scroll);
    }

    pub fn replay_flush(&mut self) {
        if self.torn_down {
            return;
        }
        self.sync();
        self.flush_replay();
    }

    pub fn replay_is_active(&self) -> bool {
        self.replay.is_active()
    }

    pub fn console_start(&mut self) {
        if self.torn_down {
            return;
        }
        self.taps.start(TapKind::Console);
    }

    pub fn console_stop(&mut self) {
        self.taps.stop(TapKind::Console);
    }

    pub fn console_is_active(&self) -> bool {
        self.taps.is_installed(TapKind::Console)
    }

    pub fn network_start(&mut self) {
        if self.torn_down {
            return;
        }
        self.taps.start(TapKind::Network);
    }

    pub fn network_stop(&mut self) {
        self.taps.stop(TapKind::Network);
    }

    pub fn network_is_active(&self) -> bool {
        self.taps.is_installed(TapKind::Network)
    }
}
