use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target base URL (defaults to http://localhost:8080)
    #[arg(short, long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// YAML or JSON file overriding stages, thresholds and pauses
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run a single iteration with one VU instead of the staged profile
    #[arg(long)]
    pub once: bool,

    /// Also write the JSON summary to this file
    #[arg(long)]
    pub summary_export: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "rampr",
            "--base-url",
            "http://example.test:9090",
            "--config",
            "load.yaml",
            "--once",
            "-o",
            "json",
        ])
        .unwrap();
        assert_eq!(args.base_url.as_deref(), Some("http://example.test:9090"));
        assert_eq!(args.config, Some(PathBuf::from("load.yaml")));
        assert!(args.once);
        assert_eq!(args.output, OutputFormat::Json);
        assert_eq!(args.summary_export, None);
    }
}
