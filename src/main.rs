use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;

use lambda_backend::{
    backend::LambdaBackendFactory,
    config::ServerConfig,
    lambda::AwsInvokerFactory,
    server::{self, UnconfiguredBackendFactory},
    spec::CompiledSpec,
    template::render_env_template,
};

#[derive(Debug, Parser)]
#[command(about = "HTTP gateway serving routes from AWS Lambda functions")]
struct Args {
    /// Path to the server config YAML.
    #[arg(long, env = "LAMBDA_BACKEND_CONFIG")]
    config: PathBuf,
}

async fn read_rendered(path: &std::path::Path) -> anyhow::Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    render_env_template(&raw).with_context(|| format!("rendering {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::info!(config = %args.config.display(), "starting");

    let cfg = ServerConfig::from_yaml_bytes(read_rendered(&args.config).await?.as_bytes())
        .context("parsing server config")?;
    let spec = CompiledSpec::from_yaml_bytes(
        read_rendered(&cfg.spec_path).await?.as_bytes(),
        cfg.default_timeout_ms,
    )
    .context("compiling routes")?;
    tracing::info!(
        event = "routes_loaded",
        routes = spec.routes().len(),
        "routes compiled"
    );

    let factory = LambdaBackendFactory::new(
        Arc::new(UnconfiguredBackendFactory),
        Arc::new(AwsInvokerFactory),
    );
    server::run(cfg, spec, Arc::new(factory)).await
}
