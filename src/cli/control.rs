use crate::daemon::{DBUS_NAME, DBUS_PATH};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use zbus::zvariant::{DynamicType, Type};

async fn call<B, R>(method: &str, body: &B) -> Result<R>
where
    B: Serialize + DynamicType,
    R: DeserializeOwned + Type,
{
    let connection = zbus::Connection::session()
        .await
        .context("Failed to connect to session D-Bus")?;

    connection
        .call_method(Some(DBUS_NAME), DBUS_PATH, Some(DBUS_NAME), method, body)
        .await
        .with_context(|| format!("Failed to call {method} - is the daemon running?"))?
        .body()
        .deserialize()
        .context("Failed to deserialize response")
}

pub async fn refresh() -> Result<()> {
    let _reply: () = call("Refresh", &()).await?;
    println!("Refresh triggered successfully");
    Ok(())
}

pub async fn begin_exclusion(reason: String) -> Result<()> {
    let started: bool = call("BeginExclusion", &(reason.as_str(),)).await?;
    if started {
        println!("Exclusion '{reason}' started, polling paused");
    } else {
        println!("Exclusion '{reason}' was already active");
    }
    Ok(())
}

pub async fn end_exclusion(reason: String) -> Result<()> {
    let ended: bool = call("EndExclusion", &(reason.as_str(),)).await?;
    if ended {
        println!("Exclusion '{reason}' ended");
    } else {
        println!("Exclusion '{reason}' was not active");
    }
    Ok(())
}
