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

//! wa-core
//!
//! Client-side web analytics pipeline. Raw host signals flow through
//! windowed aggregators into enriched envelopes that are delivered best
//! effort to a collection endpoint, alongside a batched interaction replay
//! stream.

pub mod aggregators;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod environment;
pub mod error;
pub mod error_reports;
pub mod experiments;
pub mod identity;
pub mod interactions;
pub mod intercept;
pub mod pipeline;
pub mod replay;
pub mod scheduler;
pub mod session;
pub mod signal;
pub mod storage;
pub mod transport;

pub use aggregators::Emission;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AgentConfig, BucketingStrategy, TimingConfig};
pub use envelope::{EnvelopeBuilder, EventEnvelope};
pub use environment::{Environment, EnvironmentSnapshot, PageInfo, SharedEnvironment};
pub use error::{ConfigError, StorageError, StorageResult, TransportError};
pub use experiments::{ABBucketer, Assignments};
pub use identity::IdentityStore;
pub use intercept::{Interceptors, NoopTapHost, TapHost, TapKind};
pub use pipeline::{Feature, HostCapabilities, Pipeline, PipelineBuilder};
pub use replay::{ReplayBatch, ReplayBuffer, ReplayEvent, ReplayKind};
pub use scheduler::{Scheduler, TimerToken};
pub use session::SessionTracker;
pub use signal::{Command, ElementInfo, Input, RecordedInput, Signal};
pub use storage::{
    CookieJar, FileStorage, MemoryCookieJar, MemoryStorage, Storage, StorageCookieJar,
    StorageScopes,
};
pub use transport::{
    Delivery, DeliveryStats, DeliveryTransport, HttpTransport, HttpTransportConfig,
    RecordingTransport, Transport,
};
