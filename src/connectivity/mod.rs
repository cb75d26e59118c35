pub mod http;
pub mod probe;

pub use http::HttpReachability;
pub use probe::{ConnectivityProbe, NetworkState};

use std::time::Instant;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::telemetry::{self};
use crate::telemetry::ops::probe::Phase as ProbePhase;

#[derive(Args, Debug)]
pub struct ProbeCmd {}

#[derive(Serialize)]
struct ProbeOut {
    url: String,
    online: bool,
    state: NetworkState,
}

pub async fn run(app: &AppContext, _args: ProbeCmd) -> Result<()> {
    let t0 = Instant::now();
    let log = telemetry::probe();
    let url = app.settings.resolved_probe_url()?;
    let _g = log.root_span_kv([("url", url.to_string())]).entered();

    let probe = app.probe()?;
    let state = { let _s = log.span(&ProbePhase::Check).entered(); probe.check().await };
    let online = state.is_online();
    if online {
        log.info(format!("🟢 online — {}", url));
    } else {
        log.warn_kv("🔴 offline", [
            ("connected", state.is_connected.to_string()),
            ("reachable", format!("{:?}", state.is_internet_reachable)),
        ]);
    }

    if telemetry::config::json_mode() {
        log.result_timed(&ProbeOut { url: url.to_string(), online, state }, t0.elapsed().as_millis())?;
    }
    Ok(())
}
