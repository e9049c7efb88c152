mod commands;

use clap::{Parser, Subcommand};
use fleetflow_rollout::RolloutConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleet-rollout")]
#[command(about = "イメージ単位でプロセスを入れ替える。失敗したら元に戻す。", long_about = None)]
struct Cli {
    /// 設定ファイルのパス（省略時は自動検出）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// イメージが宣言するプロセスを登録
    Register {
        /// イメージ名 (例: myapp:v2)
        image: String,
        /// プロセス名 (web worker ...)
        #[arg(required = true)]
        processes: Vec<String>,
    },
    /// アプリケーションを新しいイメージで再デプロイ
    Deploy {
        /// アプリケーション名
        #[arg(short, long, env = "FLEET_APP")]
        app: String,
        /// デプロイするイメージ
        image: String,
        /// プロセスごとの状態指定 (例: worker=+2, web=restart)
        #[arg(long = "set", value_name = "PROCESS=STATE")]
        overrides: Vec<String>,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// デプロイ履歴を表示
    History {
        /// アプリケーション名
        #[arg(short, long, env = "FLEET_APP")]
        app: String,
    },
    /// プロセスの状態を表示
    Ps {
        /// アプリケーション名
        #[arg(short, long, env = "FLEET_APP")]
        app: String,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        println!("fleet-rollout {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => RolloutConfig::from_file(path)?,
        None => RolloutConfig::load()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!("State directory: {}", config.state_dir.display());

    match cli.command {
        Commands::Register { image, processes } => {
            commands::register::handle(&config, &image, processes).await?;
        }
        Commands::Deploy {
            app,
            image,
            overrides,
            yes,
        } => {
            commands::deploy::handle(&config, &app, &image, &overrides, yes).await?;
        }
        Commands::History { app } => {
            commands::history::handle(&config, &app).await?;
        }
        Commands::Ps { app } => {
            commands::ps::handle(&config, &app).await?;
        }
        Commands::Version => {}
    }

    Ok(())
}
