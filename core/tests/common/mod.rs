// Not every test binary exercises every helper.
#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use autopilot_core::config::Config;
use autopilot_core::executor::ExecutorOptions;
use autopilot_core::executor::ProtocolExecutor;
use autopilot_core::handlers::Deps;
use autopilot_core::handlers::register_default_actions;
use autopilot_core::mock::MockSurfaces;
use autopilot_core::mock::MockVisionClient;
use autopilot_core::registry::ActionRegistry;
use autopilot_core::verifier::VisualVerifier;
use autopilot_protocol::protocol::Program;

/// Full default catalog wired to mock surfaces and a scripted vision model.
pub struct Harness {
    pub surfaces: MockSurfaces,
    pub vision: Arc<MockVisionClient>,
    pub registry: Arc<ActionRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        let surfaces = MockSurfaces::new();
        let vision = MockVisionClient::new();
        let config = Config::default();
        let verifier = Arc::new(VisualVerifier::new(
            surfaces.screen_capture(),
            vision.clone(),
            &config,
        ));
        let deps = Deps {
            keyboard: surfaces.keyboard(),
            pointer: surfaces.pointer(),
            screen: surfaces.screen_capture(),
            clipboard: surfaces.clipboard(),
            system: surfaces.system(),
            verifier,
        };
        let mut registry = ActionRegistry::new();
        register_default_actions(&mut registry, &deps);
        Self {
            surfaces,
            vision,
            registry: Arc::new(registry),
        }
    }

    pub fn executor(&self) -> ProtocolExecutor {
        ProtocolExecutor::new(self.registry.clone(), ExecutorOptions::default())
    }
}

pub fn program(value: serde_json::Value) -> Program {
    serde_json::from_value(value).expect("test program must deserialize")
}
