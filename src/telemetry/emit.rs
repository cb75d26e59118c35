use anyhow::Result;
use serde::Serialize;

use crate::output::types::{Envelope, Meta};

use super::sink::current_sink;

pub fn timed(duration_ms: u128) -> Meta {
    Meta { duration_ms: Some(duration_ms), run_id: None }
}

pub fn print_plan<T: Serialize>(op: &'static str, plan: &T, meta: Option<Meta>) -> Result<()> {
    let env = Envelope::plan(op, plan, meta)?;
    current_sink().on_plan(&env)
}

pub fn print_result<T: Serialize>(op: &'static str, result: &T, meta: Option<Meta>) -> Result<()> {
    let env = Envelope::result(op, result, meta)?;
    current_sink().on_result(&env)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::telemetry::sink::{install_sink, OutputSink};

    #[derive(Default)]
    struct Capture { seen: Mutex<Vec<(String, bool)>> }

    impl OutputSink for Capture {
        fn on_plan(&self, env: &Envelope) -> Result<()> {
            self.seen.lock().unwrap().push((env.op.to_string(), env.apply));
            Ok(())
        }
        fn on_result(&self, env: &Envelope) -> Result<()> {
            self.seen.lock().unwrap().push((env.op.to_string(), env.apply));
            Ok(())
        }
    }

    #[test]
    fn envelopes_route_through_installed_sink() {
        let cap = Arc::new(Capture::default());
        {
            let _guard = install_sink(cap.clone());
            print_plan("refresh", &json!({"responsibilities": 3}), None).unwrap();
            print_result("refresh", &json!({"succeeded": 3}), Some(timed(12))).unwrap();
        }
        let seen = cap.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![("refresh".to_string(), false), ("refresh".to_string(), true)]);
    }
}
