use colored::Colorize;
use fleetflow_rollout::{App, DeployPlan, ProcessSpec, RolloutConfig, ServicePipeline};
use std::sync::Arc;

pub async fn handle(
    config: &RolloutConfig,
    app: &str,
    image: &str,
    overrides: &[String],
    yes: bool,
) -> anyhow::Result<()> {
    let app = App::new(app);
    let overrides = if overrides.is_empty() {
        None
    } else {
        Some(ProcessSpec::parse_overrides(overrides)?)
    };

    let images = Arc::new(super::image_store(config));
    let manager = Arc::new(super::service_manager(config));
    let pipeline = ServicePipeline::new(manager, images.clone());

    if !yes {
        let plan = pipeline.plan(&app, image, overrides.as_ref()).await?;
        print_plan(&plan);
        println!();
        println!(
            "{}",
            "確認のため --yes を付けて再実行してください".yellow()
        );
        return Ok(());
    }

    let lock = images.acquire_lock().await?;
    let result = run(&pipeline, &app, image, overrides.as_ref()).await;
    super::release_lock(lock).await;
    result
}

async fn run(
    pipeline: &ServicePipeline,
    app: &App,
    image: &str,
    overrides: Option<&ProcessSpec>,
) -> anyhow::Result<()> {
    let plan = pipeline.plan(app, image, overrides).await?;
    print_plan(&plan);

    println!();
    println!("{}", "デプロイ中...".cyan());
    if let Err(e) = pipeline.execute(plan).await {
        println!(
            "{}",
            "✗ デプロイに失敗しました。適用済みのプロセスは元に戻しました"
                .red()
                .bold()
        );
        return Err(e.into());
    }

    println!();
    println!(
        "{}",
        format!("✓ {} を {} にデプロイしました", app, image)
            .green()
            .bold()
    );
    Ok(())
}

fn print_plan(plan: &DeployPlan) {
    println!("{}", format!("アプリケーション: {}", plan.app).bold());
    println!(
        "  イメージ: {} → {}",
        plan.current_image.as_deref().unwrap_or("(なし)").dimmed(),
        plan.new_image.cyan()
    );
    println!();

    let added = plan.added_processes();
    for (name, state) in plan.new_spec.iter() {
        let marker = if added.contains(name) {
            "+".green()
        } else {
            "~".yellow()
        };
        println!("  {} {} ({})", marker, name, state.to_string().dimmed());
    }
    for name in plan.obsolete_processes() {
        println!("  {} {}", "-".red(), name);
    }

    println!();
    println!("  {}", plan.summary());
}
