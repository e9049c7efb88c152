use colored::Colorize;
use fleetflow_rollout::RolloutConfig;

pub async fn handle(
    config: &RolloutConfig,
    image: &str,
    processes: Vec<String>,
) -> anyhow::Result<()> {
    let images = super::image_store(config);

    let lock = images.acquire_lock().await?;
    let result = images.register_image(image, processes.clone()).await;
    super::release_lock(lock).await;
    result?;

    println!(
        "{}",
        format!("✓ イメージ '{}' を登録しました", image).green().bold()
    );
    println!("  プロセス: {}", processes.join(", ").cyan());

    Ok(())
}
