use colored::Colorize;
use fleetflow_rollout::{App, RolloutConfig};

pub async fn handle(config: &RolloutConfig, app: &str) -> anyhow::Result<()> {
    let app = App::new(app);
    let history = super::image_store(config).history(&app).await?;

    if history.is_empty() {
        println!("{}", format!("ℹ '{}' のデプロイ履歴はありません", app).dimmed());
        return Ok(());
    }

    println!("{}", format!("デプロイ履歴: {}", app).bold());
    let last = history.len() - 1;
    for (i, record) in history.iter().enumerate() {
        let deployed_at = record.deployed_at.format("%Y-%m-%d %H:%M:%S").to_string();
        if i == last {
            println!(
                "  {} {}  {}",
                "*".green(),
                deployed_at.dimmed(),
                record.image.green().bold()
            );
        } else {
            println!("    {}  {}", deployed_at.dimmed(), record.image);
        }
    }

    Ok(())
}
