#![allow(dead_code)]

use simbus::*;
use std::sync::Arc;
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration with short beacon and retry intervals for tests.
pub fn fast_config() -> SimbusConfig {
    let mut config = SimbusConfig::default();
    config.time_sync.beacon_interval_ms = 50;
    config.time_sync.sync_timeout_ms = 2000;
    config.time_sync.master_start_timeout_ms = 2000;
    config.participant.connect_backoff_ms = 10;
    config
}

pub struct Harness {
    pub registry: Arc<InProcessRegistry>,
    pub session: Session,
    pub master: Option<TimeMaster>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: SimbusConfig) -> Self {
        let mut harness = Self::without_master(config);
        harness.master = Some(TimeMaster::start(&harness.session).unwrap());
        harness
    }

    pub fn without_master(config: SimbusConfig) -> Self {
        let registry = Arc::new(InProcessRegistry::new(config.registry_uri.clone()).unwrap());
        let session = Session::new(registry.clone(), config);
        Self {
            registry,
            session,
            master: None,
        }
    }

    /// Participant with one started CAN controller.
    pub fn can_participant(&self, name: &str) -> Participant {
        let mut participant = self.session.create_participant(Some(name)).unwrap();
        participant.add_can_controller(None, None).unwrap();
        let can = participant.can(0).unwrap();
        can.start().unwrap();
        can.wait_for_state(ControllerState::Started, TIMEOUT).unwrap();
        participant
    }
}

/// Slack for comparing timestamps taken from different beacon snapshots.
pub const CLOCK_SLACK: f64 = 0.05;

pub fn within(t: SimTime, start: SimTime, end: SimTime) -> bool {
    let t = t.as_secs_f64();
    t >= start.as_secs_f64() - CLOCK_SLACK && t <= end.as_secs_f64() + CLOCK_SLACK
}
