use crate::backend::{Backend, WslBackend};
use crate::core::models::{Distro, HealthInfo, Resource, ResourcePayload, ResourceUsage};
use crate::core::settings::Settings;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize)]
struct StatusOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    distros: Option<Vec<Distro>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_usage: Option<Vec<ResourceUsage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    health: Option<HealthInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ResourceError>,
    #[serde(with = "chrono::serde::ts_seconds")]
    fetched_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ResourceError {
    resource: Resource,
    error: String,
}

pub async fn run(json: bool, resource_filter: Option<String>) -> Result<()> {
    let settings = Settings::load()?;
    let resources = match resource_filter.as_deref() {
        Some(filter) => vec![filter.parse::<Resource>()?],
        None => Resource::ALL.to_vec(),
    };

    let backend = WslBackend::new(settings.backend.command);
    let output = collect_status(&backend, &resources).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text_output(&output);
    }

    Ok(())
}

async fn collect_status(backend: &dyn Backend, resources: &[Resource]) -> StatusOutput {
    let mut output = StatusOutput {
        distros: None,
        resource_usage: None,
        health: None,
        errors: Vec::new(),
        fetched_at: Utc::now(),
    };

    for resource in resources {
        match backend.fetch(*resource).await {
            Ok(ResourcePayload::Distros(distros)) => output.distros = Some(distros),
            Ok(ResourcePayload::ResourceUsage(usage)) => output.resource_usage = Some(usage),
            Ok(ResourcePayload::Health(health)) => output.health = Some(health),
            Err(e) => output.errors.push(ResourceError {
                resource: *resource,
                error: format!("{e:#}"),
            }),
        }
    }

    output
}

fn print_text_output(output: &StatusOutput) {
    if let Some(distros) = &output.distros {
        println!("Distributions");
        if distros.is_empty() {
            println!("  (none installed)");
        }
        for distro in distros {
            let marker = if distro.is_default { "*" } else { " " };
            println!(
                "  {} {:<24} {:<12} WSL{}",
                marker, distro.name, distro.state, distro.version
            );
        }
        println!();
    }

    if let Some(usage) = &output.resource_usage {
        println!("Resource usage");
        if usage.is_empty() {
            println!("  (no running distributions)");
        }
        for u in usage {
            println!(
                "  {:<24} mem {:>5.1}% of {}  load {:.2} {:.2} {:.2}",
                u.distro,
                u.memory_used_percent() * 100.0,
                format_bytes(u.memory_total_bytes),
                u.load_average[0],
                u.load_average[1],
                u.load_average[2]
            );
        }
        println!();
    }

    if let Some(health) = &output.health {
        println!("Health");
        println!(
            "  WSL version:    {}",
            health.wsl_version.as_deref().unwrap_or("unknown")
        );
        println!(
            "  Kernel version: {}",
            health.kernel_version.as_deref().unwrap_or("unknown")
        );
        for (component, version) in &health.components {
            println!("  {}: {}", component, version);
        }
        println!();
    }

    for error in &output.errors {
        println!("Error fetching {}: {}", error.resource, error.error);
    }
}

fn format_bytes(bytes: u64) -> String {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;

    let bytes = bytes as f64;
    if bytes >= GIB {
        format!("{:.1} GiB", bytes / GIB)
    } else {
        format!("{:.0} MiB", bytes / MIB)
    }
}
