use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct SyncOp;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Plan, Confirm, Watch }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self {
        Phase::Plan => "plan",
        Phase::Confirm => "confirm",
        Phase::Watch => "watch",
    }}
    fn span(&self) -> Span { match self {
        Phase::Plan => info_span!("plan"),
        Phase::Confirm => info_span!("confirm"),
        Phase::Watch => info_span!("watch"),
    }}
}

impl OpMarker for SyncOp {
    const NAME: &'static str = "sync";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("sync") }
}
