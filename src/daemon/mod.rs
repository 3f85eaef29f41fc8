mod app;
mod dbus;
pub mod exclusion;
pub mod focus;
pub mod polling;
pub mod readiness;
pub mod settings_sync;

use anyhow::Result;

pub const DBUS_NAME: &str = "io.github.distrosync.Daemon";
pub const DBUS_PATH: &str = "/io/github/distrosync/Daemon";

pub async fn run() -> Result<()> {
    tracing::info!("Starting distro-sync daemon");
    app::run().await
}
