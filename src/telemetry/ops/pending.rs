use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Pending;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Plan, Enqueue, List }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self { Phase::Plan => "plan", Phase::Enqueue => "enqueue", Phase::List => "list" } }
    fn span(&self) -> Span { match self { Phase::Plan => info_span!("plan"), Phase::Enqueue => info_span!("enqueue"), Phase::List => info_span!("list") } }
}

impl OpMarker for Pending {
    const NAME: &'static str = "pending";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("pending") }
}
