//! Serial port listing.

use {
    crate::serial::preferred_port,
    anyhow::{Context, Result},
    console::style,
    devlink::{NativePortEnumerator, PortEnumerator},
};

/// List-ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports().context("Failed to enumerate serial ports")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    println!("{}", style("Available serial ports").bold().underlined());

    if ports.is_empty() {
        println!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        println!("  {} {}", style("•").green(), style(port.describe()).cyan());
    }

    if let Some(port) = preferred_port(&ports) {
        println!(
            "\n{} Auto-selects {}",
            style("→").green().bold(),
            style(&port.name).cyan().bold()
        );
    }
    Ok(())
}
