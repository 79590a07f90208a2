//! Application wiring -- configuration resolution, pipeline assembly and the run loop.
//!
//! # Configuration precedence
//!
//! 1. Built-in defaults (or `querywatch.toml` when `--config` is given)
//! 2. `QUERYWATCH_{SECTION}_{FIELD}` environment variables
//! 3. CLI flags
//!
//! The merged configuration is validated once more after CLI overrides.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use querywatch_core::config::{InputConfig, OutputConfig, QueryWatchConfig};
use querywatch_core::metrics as m;
use querywatch_core::pipeline::DynAlertSink;
use querywatch_pipeline::source::line::BoxedReader;
use querywatch_pipeline::{
    AnalyzerRegistry, ConsoleSink, JsonLinesSink, LineSource, PipelineConfig, PipelineReport,
    QueryPipeline, QueryPipelineBuilder, QuerySource, RecordFormat, SignatureDef, SignatureLoader,
};

use crate::cli::DaemonCli;

/// Load the configuration and apply environment and CLI overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the
/// merged configuration fails validation.
pub async fn resolve_config(cli: &DaemonCli) -> Result<QueryWatchConfig> {
    let mut config = match &cli.config {
        Some(path) => QueryWatchConfig::load(path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?,
        None => {
            let mut config = QueryWatchConfig::default();
            config.apply_env_overrides();
            config
        }
    };

    apply_cli_overrides(&mut config, cli);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
    Ok(config)
}

/// Apply CLI flags on top of an already-loaded configuration.
pub fn apply_cli_overrides(config: &mut QueryWatchConfig, cli: &DaemonCli) {
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
    if let Some(input) = &cli.input {
        config.input.path = input.to_string_lossy().into_owned();
    }
    if let Some(format) = &cli.format {
        config.input.format = format.clone();
    }
}

/// Load extra injection signatures from `[sql_injection].signature_dir`.
///
/// An empty directory setting means no extra signatures.
pub async fn load_signatures(config: &QueryWatchConfig) -> Result<Vec<SignatureDef>> {
    let dir = config.sql_injection.signature_dir.as_str();
    if dir.is_empty() {
        return Ok(Vec::new());
    }

    let signatures = SignatureLoader::load_directory(dir)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load signatures: {}", e))?;
    tracing::info!(dir, count = signatures.len(), "signature files loaded");
    Ok(signatures)
}

/// Create the alert sinks named in `[output].sinks`.
pub async fn build_sinks(output: &OutputConfig) -> Result<Vec<Arc<dyn DynAlertSink>>> {
    let mut sinks: Vec<Arc<dyn DynAlertSink>> = Vec::with_capacity(output.sinks.len());
    for name in &output.sinks {
        match name.as_str() {
            "console" => sinks.push(Arc::new(ConsoleSink::stdout())),
            "json" if output.json_path.is_empty() => {
                sinks.push(Arc::new(JsonLinesSink::stdout()));
            }
            "json" => {
                let sink = JsonLinesSink::append(&output.json_path)
                    .await
                    .map_err(|e| {
                        anyhow::anyhow!("failed to open '{}': {}", output.json_path, e)
                    })?;
                sinks.push(Arc::new(sink));
            }
            other => return Err(anyhow::anyhow!("unknown sink '{}'", other)),
        }
    }
    Ok(sinks)
}

/// Open the configured input. An empty path reads stdin.
pub async fn open_source(
    input: &InputConfig,
    format: RecordFormat,
) -> Result<LineSource<BoxedReader>> {
    if input.path.is_empty() {
        tracing::info!(format = format.parser_name(), "reading records from stdin");
        return Ok(LineSource::stdin(format));
    }

    let source = LineSource::open(Path::new(&input.path), format)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open input: {}", e))?;
    tracing::info!(path = input.path.as_str(), format = format.parser_name(), "reading records from file");
    Ok(source)
}

/// A fully assembled query pipeline ready to run.
pub struct App<S> {
    pipeline: QueryPipeline<S>,
}

impl App<LineSource<BoxedReader>> {
    /// Build the pipeline reading from the configured input.
    pub async fn build(config: &QueryWatchConfig) -> Result<Self> {
        let format = PipelineConfig::from_core(config).input_format;
        let source = open_source(&config.input, format).await?;
        Self::with_source(config, source).await
    }
}

impl<S: QuerySource> App<S> {
    /// Build the pipeline around an arbitrary source.
    ///
    /// Useful for testing or when records come from somewhere other than
    /// a file or stdin.
    pub async fn with_source(config: &QueryWatchConfig, source: S) -> Result<Self> {
        let pipeline_config = PipelineConfig::from_core(config);
        let signatures = load_signatures(config).await?;
        let registry = AnalyzerRegistry::from_config(&pipeline_config, signatures)
            .map_err(|e| anyhow::anyhow!("failed to build analyzers: {}", e))?;

        metrics::gauge!(m::DAEMON_ANALYZERS_REGISTERED).set(registry.len() as f64);
        tracing::info!(
            analyzers = ?registry.names(),
            concurrent = registry.is_concurrent(),
            "analyzers registered"
        );

        let mut builder = QueryPipelineBuilder::new()
            .config(pipeline_config)
            .registry(registry);
        for sink in build_sinks(&config.output).await? {
            builder = builder.sink(sink);
        }

        let pipeline = builder
            .build(source)
            .map_err(|e| anyhow::anyhow!("failed to build pipeline: {}", e))?;
        Ok(Self { pipeline })
    }

    /// Token that stops the pipeline between records when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.pipeline.cancel_token()
    }

    pub fn pipeline(&self) -> &QueryPipeline<S> {
        &self.pipeline
    }

    /// Run until the source ends or the cancel token fires.
    pub async fn run(mut self) -> Result<PipelineReport> {
        let report = self
            .pipeline
            .run()
            .await
            .map_err(|e| anyhow::anyhow!("pipeline stopped: {}", e))?;

        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            malformed = report.malformed,
            analyzer_faults = report.analyzer_faults,
            alerts = report.alerts,
            sink_failures = report.sink_failures,
            source_errors = report.source_errors,
            "pipeline finished"
        );
        Ok(report)
    }
}
