use anyhow::Context;
use clap::Parser;
use imgpipe::{Application, Config, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before anything else that might build a TLS client
    imgpipe::install_crypto_provider();

    // Parse CLI args
    let args = imgpipe::config::Args::parse();

    // Load configuration
    let config = Config::load(&args)?;

    // If --validate flag is set, exit successfully after config validation
    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    // Initialize telemetry (tracing + optional OpenTelemetry)
    telemetry::init_telemetry(config.enable_otel_export)?;

    tracing::debug!("{:?}", args);

    let request = args.run_request().context("--subject is required")?;

    let result = async {
        let app = Application::new(config).await?;
        let summary = app.run(&request).await?;
        Ok::<_, imgpipe::Error>((app.config().pipeline.output_dir.clone(), summary))
    }
    .await;

    telemetry::shutdown_telemetry();

    let (output_dir, summary) = result.context("Image pipeline failed")?;
    println!(
        "Processed {} of {} images for '{}' ({} failed)",
        summary.succeeded(),
        summary.found,
        summary.subject,
        summary.failed()
    );
    for file in summary.files() {
        println!("  {}", output_dir.join(file).display());
    }
    Ok(())
}
