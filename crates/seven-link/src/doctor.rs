use anyhow::{Context, Result};

use crate::transport::{AdapterState, Connector, RfcommConnector};
use crate::LinkConfig;

/// `XX:XX:XX:XX:XX:XX`, hex digits uppercase.
pub fn is_bluetooth_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts.iter().all(|p| {
            p.len() == 2 && p.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        })
}

pub fn check_address(address: Option<&str>) -> Result<()> {
    let address = address.context("device address not set (device.address or device.address_file)")?;
    anyhow::ensure!(
        is_bluetooth_address(address),
        "device address {:?} is not of the form XX:XX:XX:XX:XX:XX",
        address
    );
    Ok(())
}

pub fn check_link(cfg: &LinkConfig) -> Result<()> {
    match cfg.transport.as_str() {
        "rfcomm" | "loopback" => {}
        "tcp" => anyhow::ensure!(
            cfg.endpoint.as_deref().is_some_and(|e| !e.is_empty()),
            "link.endpoint missing (transport = tcp)"
        ),
        other => anyhow::bail!("unknown link.transport: {}", other),
    }
    anyhow::ensure!(
        cfg.connect_timeout().as_millis() >= 500,
        "link.connect_timeout_ms too small; set >= 500"
    );
    anyhow::ensure!(
        cfg.io_timeout().as_millis() >= 100,
        "link.io_timeout_ms too small; set >= 100"
    );
    Ok(())
}

pub fn check_rfcomm(conn: &RfcommConnector, address: &str) -> Result<()> {
    match conn.adapter_state() {
        AdapterState::Missing => anyhow::bail!("bluetooth adapter {} not found", conn.adapter()),
        AdapterState::Disabled => anyhow::bail!("bluetooth adapter {} is rfkill-blocked", conn.adapter()),
        AdapterState::Ready => {}
    }
    let tty = conn.find_tty(address).context("rfcomm binding")?;
    anyhow::ensure!(tty.exists(), "{} is bound but missing", tty.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_format() {
        assert!(is_bluetooth_address("00:06:66:4A:1B:2C"));
        assert!(!is_bluetooth_address("00:06:66:4a:1b:2c"));
        assert!(!is_bluetooth_address("00:06:66:4A:1B"));
        assert!(!is_bluetooth_address("0006664A1B2C"));
        assert!(check_address(None).is_err());
    }

    #[test]
    fn link_settings() {
        assert!(check_link(&LinkConfig::default()).is_ok());
        let tcp = LinkConfig { transport: "tcp".into(), ..LinkConfig::default() };
        assert!(check_link(&tcp).is_err());
        let bad = LinkConfig { transport: "usb".into(), ..LinkConfig::default() };
        assert!(check_link(&bad).is_err());
        let tight = LinkConfig { io_timeout_ms: Some(10), ..LinkConfig::default() };
        assert!(check_link(&tight).is_err());
    }
}
