use clap::Parser;
use erosion_insight::utils::error::{ErrorSeverity, InsightError};
use erosion_insight::utils::{logger, validation::Validate};
use erosion_insight::{http_sources, CliConfig, Orchestrator, ResponseDocument};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliConfig::parse();

    // 初始化日誌
    logger::init_cli_logger(cli.verbose);

    tracing::info!("Starting erosion-insight CLI");
    if cli.verbose {
        tracing::debug!("CLI args: {:?}", cli);
    }

    if let Err(e) = cli.validate() {
        fail("Argument validation failed", &e);
    }

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => fail("Could not load configuration", &e),
    };
    if let Err(e) = config.validate() {
        fail("Configuration validation failed", &e);
    }

    let monitor_enabled = cli.monitor || config.monitoring_enabled();
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let request = match cli.analysis_request() {
        Ok(request) => request,
        Err(e) => fail("Could not read polygon", &e),
    };

    let sources = match http_sources(&config) {
        Ok(sources) => sources,
        Err(e) => fail("Could not build HTTP sources", &e),
    };
    let orchestrator = Orchestrator::new_with_monitoring(config, sources, monitor_enabled);

    match orchestrator.run(request).await {
        Ok(document) => {
            if let Err(e) = write_document(&document, cli.output.as_deref()) {
                fail("Could not write response", &e);
            }
            if document.success {
                tracing::info!("✅ Analysis completed successfully!");
            } else {
                // 必要來源失敗：回應仍完整輸出，以重試用的退出碼結束
                tracing::warn!("⚠️ Analysis finished without erosion data");
                std::process::exit(2);
            }
        }
        Err(e) => fail("Analysis rejected", &e),
    }

    Ok(())
}

fn write_document(
    document: &ResponseDocument,
    output: Option<&str>,
) -> erosion_insight::Result<()> {
    let json = serde_json::to_string_pretty(document)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!("📁 Response saved to: {}", path);
            println!("📁 Response saved to: {}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn fail(context: &str, e: &InsightError) -> ! {
    tracing::error!(
        "❌ {}: {} (Category: {:?}, Severity: {:?})",
        context,
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
