use crate::backend::Backend;
use crate::core::models::{Distro, DistroState, HealthInfo, ResourceUsage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::process::Command;

const WSL_VERSION_KEY: &str = "WSL version";
const KERNEL_VERSION_KEY: &str = "Kernel version";

/// Backend that shells out to the `wsl.exe` command-line tool.
pub struct WslBackend {
    command: String,
}

impl WslBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.command)
            .args(args)
            .env("WSL_UTF8", "1")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.command))?;

        if !output.status.success() {
            let stderr = decode_output(&output.stderr);
            let stdout = decode_output(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout
            } else {
                stderr
            };
            anyhow::bail!(
                "{} {} failed ({}): {}",
                self.command,
                args.join(" "),
                output.status,
                detail.trim()
            );
        }

        Ok(decode_output(&output.stdout))
    }
}

impl Default for WslBackend {
    fn default() -> Self {
        Self::new("wsl.exe")
    }
}

#[async_trait]
impl Backend for WslBackend {
    fn name(&self) -> &'static str {
        "wsl"
    }

    async fn list_distros(&self) -> Result<Vec<Distro>> {
        let output = self.run(&["--list", "--verbose"]).await?;
        Ok(parse_distro_list(&output))
    }

    async fn resource_usage(&self) -> Result<Vec<ResourceUsage>> {
        let distros = self.list_distros().await?;
        let mut usage = Vec::new();

        for distro in distros.iter().filter(|d| d.state.is_running()) {
            let result = self
                .run(&[
                    "--distribution",
                    &distro.name,
                    "--exec",
                    "cat",
                    "/proc/meminfo",
                    "/proc/loadavg",
                ])
                .await
                .and_then(|out| parse_proc_usage(&distro.name, &out));

            match result {
                Ok(u) => usage.push(u),
                Err(e) => {
                    // The distro may have stopped between the listing and the query.
                    tracing::debug!(distro = %distro.name, error = %e, "Skipping usage for distro");
                }
            }
        }

        Ok(usage)
    }

    async fn health(&self) -> Result<HealthInfo> {
        let output = self.run(&["--version"]).await?;
        parse_version_info(&output)
    }

    async fn is_ready(&self) -> bool {
        match self.run(&["--status"]).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Backend not ready");
                false
            }
        }
    }
}

/// `wsl.exe` writes UTF-16LE unless `WSL_UTF8` is honoured, so sniff for it.
pub(crate) fn decode_output(bytes: &[u8]) -> String {
    let has_bom = bytes.starts_with(&[0xFF, 0xFE]);
    let looks_utf16 = bytes.len() >= 2
        && bytes.len() % 2 == 0
        && bytes.iter().skip(1).step_by(2).filter(|b| **b == 0).count() * 2 >= bytes.len() / 2;

    if has_bom || looks_utf16 {
        let start = if has_bom { 2 } else { 0 };
        let units: Vec<u16> = bytes[start..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    String::from_utf8_lossy(bytes).into_owned()
}

pub(crate) fn parse_distro_list(output: &str) -> Vec<Distro> {
    output
        .lines()
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .filter(|line| !line.is_empty())
        // First line is the localized column header.
        .skip(1)
        .filter_map(|line| {
            let is_default = line.starts_with('*');
            let line = line.trim_start_matches('*').trim();
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }

            let version = parts[parts.len() - 1].parse::<u8>().ok()?;
            let state = DistroState::parse(parts[parts.len() - 2]);
            let name = parts[..parts.len() - 2].join(" ");

            Some(Distro {
                name,
                state,
                version,
                is_default,
            })
        })
        .collect()
}

pub(crate) fn parse_proc_usage(distro: &str, output: &str) -> Result<ResourceUsage> {
    let mut total_kb = None;
    let mut available_kb = None;
    let mut load_average = None;

    for line in output.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let kb = value
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<u64>().ok());
            match key.trim() {
                "MemTotal" => total_kb = kb,
                "MemAvailable" => available_kb = kb,
                _ => {}
            }
            continue;
        }

        let loads: Vec<f64> = line
            .split_whitespace()
            .take(3)
            .filter_map(|v| v.parse::<f64>().ok())
            .collect();
        if loads.len() == 3 {
            load_average = Some([loads[0], loads[1], loads[2]]);
        }
    }

    let total_kb = total_kb.context("MemTotal missing from /proc/meminfo")?;
    let available_kb = available_kb.context("MemAvailable missing from /proc/meminfo")?;

    Ok(ResourceUsage {
        distro: distro.to_string(),
        memory_total_bytes: total_kb.saturating_mul(1024),
        memory_used_bytes: total_kb.saturating_sub(available_kb).saturating_mul(1024),
        load_average: load_average.unwrap_or([0.0; 3]),
    })
}

pub(crate) fn parse_version_info(output: &str) -> Result<HealthInfo> {
    let mut components = BTreeMap::new();

    for line in output.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            if !key.is_empty() && !value.is_empty() {
                components.insert(key.to_string(), value.to_string());
            }
        }
    }

    if components.is_empty() {
        anyhow::bail!("No version information in backend output");
    }

    let wsl_version = components.remove(WSL_VERSION_KEY);
    let kernel_version = components.remove(KERNEL_VERSION_KEY);

    Ok(HealthInfo {
        wsl_version,
        kernel_version,
        components,
        checked_at: Utc::now(),
    })
}
