//! Command-line arguments.

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about = "Court booking and membership service")]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Services to run (defaults to all)
    #[arg(long = "service", value_enum)]
    pub services: Vec<ServiceName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}

/// Pretty logs for local development, JSON in release builds.
fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ServiceName {
    Web,
    Maintenance,
}

impl ServiceName {
    pub fn all() -> Vec<ServiceName> {
        vec![ServiceName::Web, ServiceName::Maintenance]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Web => "web",
            ServiceName::Maintenance => "maintenance",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_services_and_format() {
        let args = Args::parse_from([
            "rally",
            "--tracing",
            "json",
            "--service",
            "web",
        ]);
        assert_eq!(args.tracing, TracingFormat::Json);
        assert_eq!(args.services, vec![ServiceName::Web]);
    }

    #[test]
    fn empty_services_means_all() {
        let args = Args::parse_from(["rally"]);
        assert!(args.services.is_empty());
        assert_eq!(ServiceName::all().len(), 2);
    }
}
