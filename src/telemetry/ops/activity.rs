use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Activity;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Load, Consolidate }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self { Phase::Load => "load", Phase::Consolidate => "consolidate" } }
    fn span(&self) -> Span { match self { Phase::Load => info_span!("load"), Phase::Consolidate => info_span!("consolidate") } }
}

impl OpMarker for Activity {
    const NAME: &'static str = "activity";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("activity") }
}
