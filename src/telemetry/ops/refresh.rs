use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Refresh;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Plan, LoadJournal, Pass, SaveJournal, Consolidate }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self {
        Phase::Plan => "plan",
        Phase::LoadJournal => "load_journal",
        Phase::Pass => "pass",
        Phase::SaveJournal => "save_journal",
        Phase::Consolidate => "consolidate",
    }}
    fn span(&self) -> Span { match self {
        Phase::Plan => info_span!("plan"),
        Phase::LoadJournal => info_span!("load_journal"),
        Phase::Pass => info_span!("pass"),
        Phase::SaveJournal => info_span!("save_journal"),
        Phase::Consolidate => info_span!("consolidate"),
    }}
}

impl OpMarker for Refresh {
    const NAME: &'static str = "refresh";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("refresh") }
}
