use std::env;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub pretty: bool,
}

impl OutputConfig {
    pub fn from_env() -> Self {
        Self::from_values(
            env::var("DOCK_OUTPUT_FORMAT").ok().as_deref(),
            env::var("DOCK_OUTPUT_PRETTY").ok().as_deref(),
            crate::telemetry::config::json_mode(),
        )
    }

    /// `--json` forces JSON regardless of DOCK_OUTPUT_FORMAT.
    pub fn from_values(format: Option<&str>, pretty: Option<&str>, json_flag: bool) -> Self {
        let format = match format {
            _ if json_flag => OutputFormat::Json,
            Some(v) if v.eq_ignore_ascii_case("json") => OutputFormat::Json,
            _ => OutputFormat::Text,
        };
        let pretty = matches!(pretty, Some(v) if v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"));
        OutputConfig { format, pretty }
    }

    pub fn wants_json(&self) -> bool { self.format == OutputFormat::Json }
}
