pub mod config;
pub mod ctx;
pub mod emit;
pub mod ops;
pub mod sink;

use ctx::LogCtx;

// One typed log context per command
pub fn init() -> LogCtx<ops::init::Init> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn refresh() -> LogCtx<ops::refresh::Refresh> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn activity() -> LogCtx<ops::activity::Activity> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn sync() -> LogCtx<ops::sync::SyncOp> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn pending() -> LogCtx<ops::pending::Pending> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
pub fn probe() -> LogCtx<ops::probe::Probe> { LogCtx { json: config::logs_are_json(), _marker: std::marker::PhantomData } }
