pub mod consolidate;
pub mod policy;
pub mod types;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use crate::app::AppContext;
use crate::telemetry::ops::activity::Phase as ActivityPhase;
use crate::telemetry::{self};

use consolidate::ConsolidationEngine;
use types::{parse_wire_records, RawActivityRecord};

#[derive(Args, Debug)]
pub struct ActivityCmd {
    /// JSON array of activity records; defaults to the last journaled pass
    #[arg(long)] pub file: Option<PathBuf>,
    /// Only show groups that need attention
    #[arg(long, default_value_t = false)] pub expandable_only: bool,
}

pub async fn run(app: &AppContext, args: ActivityCmd) -> Result<()> {
    let t0 = Instant::now();
    let log = telemetry::activity();
    let source = args.file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "journal".to_string());
    let _g = log.root_span_kv([("source", source)]).entered();

    let records: Vec<RawActivityRecord> = {
        let _s = log.span(&ActivityPhase::Load).entered();
        match &args.file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
                let value: serde_json::Value = serde_json::from_str(&raw).context("activity file is not JSON")?;
                parse_wire_records(&value)
            }
            None => match app.store.last_pass().await? {
                Some(entry) => entry.lanes.into_iter().flat_map(|l| l.records).collect(),
                None => {
                    log.info("No refresh pass recorded yet.");
                    Vec::new()
                }
            },
        }
    };

    let mut groups = {
        let _s = log.span(&ActivityPhase::Consolidate).entered();
        ConsolidationEngine::default().consolidate(&records)
    };
    if args.expandable_only {
        groups.retain(|g| g.can_expand);
    }

    log.info(format!("🗂  {} record(s) → {} API group(s)", records.len(), groups.len()));
    for g in &groups {
        log.api_line(g);
    }
    if telemetry::config::json_mode() {
        log.result_timed(&groups, t0.elapsed().as_millis())?;
    }
    Ok(())
}
