use anyhow::Result;
use clap::Parser;

use relaypost_core::RelaypostConfig;
use relaypost_daemon::cli::DaemonCli;
use relaypost_daemon::logging;
use relaypost_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 설정 로드와 CLI 오버라이드는 로깅 초기화보다 먼저 끝낸다.
    // 로그 레벨/형식이 설정에서 오기 때문이다.
    let mut config = RelaypostConfig::load(&cli.config).map_err(|e| {
        anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e)
    })?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    // --validate는 여기서 끝. 그래프는 만들지 않는다
    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "relaypost-daemon starting"
    );

    // 그래프 구성 후 종료 시그널 또는 소스 고갈까지 감독
    let mut orchestrator = Orchestrator::build_from_config(config, &cli)?;
    orchestrator.run().await
}
