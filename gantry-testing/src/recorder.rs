// Hook call recording

use gantry_core::{HookPhase, Scope};
use parking_lot::Mutex;
use std::sync::Arc;

/// One recorded hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCall {
    pub label: String,
    pub phase: HookPhase,
    pub path: String,
}

/// Records lifecycle hook invocations across scopes.
///
/// Attach the recorder to any number of scopes under distinct labels and
/// inspect the call order afterwards.
#[derive(Clone, Default)]
pub struct HookRecorder {
    calls: Arc<Mutex<Vec<HookCall>>>,
}

impl HookRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recording hook for every phase on `scope`.
    pub fn attach(&self, scope: &mut Scope<'_>, label: &str) {
        for phase in HookPhase::ALL {
            self.attach_phase(scope, label, phase);
        }
    }

    /// Register a recording hook for a single phase.
    pub fn attach_phase(&self, scope: &mut Scope<'_>, label: &str, phase: HookPhase) {
        let calls = self.calls.clone();
        let label = label.to_string();
        let record = move |path: &str| {
            calls.lock().push(HookCall {
                label: label.clone(),
                phase,
                path: path.to_string(),
            });
        };

        match phase {
            HookPhase::OnRequest => {
                scope.on_request(move |req, _reply| {
                    record(req.path());
                    async { Ok(()) }
                });
            }
            HookPhase::PreHandler => {
                scope.pre_handler(move |req, _reply| {
                    record(req.path());
                    async { Ok(()) }
                });
            }
            HookPhase::OnSend => {
                scope.on_send(move |req, _reply, _payload| {
                    record(req.path());
                    async { Ok(None) }
                });
            }
            HookPhase::OnFinished => {
                scope.on_finished(move |req, _reply| {
                    record(req.path());
                    async { Ok(()) }
                });
            }
            HookPhase::OnError => {
                scope.on_error(move |req, _reply, _err| {
                    record(req.path());
                    async { Ok(()) }
                });
            }
        }
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().clone()
    }

    /// `label:phase` strings in call order, e.g. `root:onRequest`.
    pub fn sequence(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|c| format!("{}:{}", c.label, c.phase))
            .collect()
    }

    pub fn call_count(&self, phase: HookPhase) -> usize {
        self.calls.lock().iter().filter(|c| c.phase == phase).count()
    }

    pub fn was_called(&self, label: &str, phase: HookPhase) -> bool {
        self.calls
            .lock()
            .iter()
            .any(|c| c.label == label && c.phase == phase)
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl std::fmt::Debug for HookRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRecorder")
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}
