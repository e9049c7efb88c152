use colored::Colorize;
use fleetflow_rollout::{App, RolloutConfig, ServiceLabels};

pub async fn handle(config: &RolloutConfig, app: &str) -> anyhow::Result<()> {
    let app = App::new(app);
    let services = super::service_manager(config).list_services(&app).await?;

    if services.is_empty() {
        println!("{}", format!("ℹ '{}' のプロセスはありません", app).dimmed());
        return Ok(());
    }

    println!(
        "{:<20} {:<30} {:>8} {:>8}  {}",
        "PROCESS".bold(),
        "IMAGE".bold(),
        "RUNNING".bold(),
        "DESIRED".bold(),
        "STATE".bold()
    );
    for service in services {
        let labels = ServiceLabels::from_map(&config.label_namespace, &service.labels)?;
        let state = if labels.is_stopped() {
            "stopped".red()
        } else if labels.is_asleep() {
            "asleep".yellow()
        } else {
            "running".green()
        };
        let restarts = if labels.restarts() > 0 {
            format!(" (restarts: {})", labels.restarts())
        } else {
            String::new()
        };
        println!(
            "{:<20} {:<30} {:>8} {:>8}  {}{}",
            service.process,
            service.image,
            service.replicas,
            labels.replicas(),
            state,
            restarts.dimmed()
        );
    }

    Ok(())
}
