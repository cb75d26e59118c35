use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use anyhow::Result;

use crate::output::config::OutputConfig;
use crate::output::types::Envelope;
use crate::output::Emitter;

/// Destination for plan/result envelopes.
pub trait OutputSink: Send + Sync {
    fn on_plan(&self, env: &Envelope) -> Result<()>;
    fn on_result(&self, env: &Envelope) -> Result<()>;
}

/// Writes envelopes to stdout in the format `DOCK_OUTPUT_FORMAT` selects.
pub struct StdoutSink;

impl StdoutSink {
    fn emit(env: &Envelope) -> Result<()> {
        Emitter::from_config(OutputConfig::from_env()).emit(env).map_err(anyhow::Error::from)
    }
}

impl OutputSink for StdoutSink {
    fn on_plan(&self, env: &Envelope) -> Result<()> { Self::emit(env) }
    fn on_result(&self, env: &Envelope) -> Result<()> { Self::emit(env) }
}

type DynSink = Arc<dyn OutputSink>;

fn sink_slot() -> &'static Mutex<DynSink> {
    static SINK: OnceLock<Mutex<DynSink>> = OnceLock::new();
    SINK.get_or_init(|| Mutex::new(Arc::new(StdoutSink) as DynSink))
}

pub fn current_sink() -> DynSink {
    sink_slot().lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Puts the previous sink back when dropped.
#[cfg(test)]
pub struct SinkGuard {
    previous: DynSink,
}

/// Swap the process-wide sink so tests can capture envelopes instead of printing them.
#[cfg(test)]
pub fn install_sink(sink: DynSink) -> SinkGuard {
    let mut slot = sink_slot().lock().unwrap_or_else(PoisonError::into_inner);
    let previous = std::mem::replace(&mut *slot, sink);
    SinkGuard { previous }
}

#[cfg(test)]
impl Drop for SinkGuard {
    fn drop(&mut self) {
        *sink_slot().lock().unwrap_or_else(PoisonError::into_inner) = self.previous.clone();
    }
}
