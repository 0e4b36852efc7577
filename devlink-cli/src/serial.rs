//! Interactive serial port selection.
//!
//! Port resolution order:
//! - Explicit `--port` / `DEVLINK_PORT`
//! - `[connection] port` from configuration
//! - Auto-detection, preferring USB serial devices
//! - Interactive selection via dialoguer (never in non-interactive mode)
//!
//! [`CliPortOpener`] plugs this into [`devlink::Session`], so the same
//! selection runs when a session connects or has to pick a new port on
//! reconnect.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    devlink::{NativePortEnumerator, NativePortOpener, PortEnumerator, PortInfo, PortOpener, Transport},
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

/// Where a selected port name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    /// `--port` flag or environment variable.
    Explicit,
    /// Configuration file.
    Config,
    /// Auto-detected or picked from a prompt.
    Detected,
}

/// Result of port selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPort {
    /// Port name/path.
    pub name: String,
    /// How the port was chosen.
    pub source: PortSource,
}

impl SelectedPort {
    fn new(name: impl Into<String>, source: PortSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// [`PortOpener`] that selects ports the way the CLI does and opens them
/// natively.
pub struct CliPortOpener {
    options: SerialOptions,
    config_port: Option<String>,
    native: NativePortOpener,
    selected: Option<SelectedPort>,
    failure: Option<anyhow::Error>,
}

impl CliPortOpener {
    /// Create an opener from CLI options and the loaded configuration.
    pub fn new(options: SerialOptions, config: &Config) -> Self {
        Self {
            options,
            config_port: config.connection.port.clone(),
            native: NativePortOpener::new(),
            selected: None,
            failure: None,
        }
    }

    /// The port chosen by the last successful selection.
    pub fn selected(&self) -> Option<&SelectedPort> {
        self.selected.as_ref()
    }

    /// Take the CLI error behind the last failed selection.
    ///
    /// Session errors only carry a message; this keeps the original error so
    /// it maps to the right exit code.
    pub fn take_failure(&mut self) -> Option<anyhow::Error> {
        self.failure.take()
    }
}

impl PortOpener for CliPortOpener {
    fn open(&mut self, port_name: &str, baud_rate: u32) -> devlink::Result<Box<dyn Transport>> {
        self.native.open(port_name, baud_rate)
    }

    fn select_port(&mut self) -> devlink::Result<String> {
        match select_serial_port(&self.options, self.config_port.as_deref()) {
            Ok(selected) => {
                let name = selected.name.clone();
                self.selected = Some(selected);
                Ok(name)
            },
            Err(err) => {
                let message = format!("{err:#}");
                self.failure = Some(err);
                Err(devlink::Error::Config(message))
            },
        }
    }
}

fn usage_err(message: &str) -> anyhow::Error {
    // Selection failures are usage/setup problems (exit 2), not runtime errors.
    CliError::Usage(message.to_string()).into()
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config_port: Option<&str>) -> Result<SelectedPort> {
    // If port explicitly specified, use it
    if let Some(port_name) = &options.port {
        return Ok(SelectedPort::new(port_name, PortSource::Explicit));
    }

    // If port in config, use it
    if let Some(port_name) = config_port {
        debug!("Using port from config: {port_name}");
        return Ok(SelectedPort::new(port_name, PortSource::Config));
    }

    let ports = NativePortEnumerator::list_ports()?;
    if ports.is_empty() {
        return Err(usage_err(
            "No serial ports found. Connect the device or pass --port",
        ));
    }

    let candidates = candidate_ports(ports);

    // Non-interactive mode must never prompt
    if options.non_interactive {
        return select_non_interactive_port(candidates);
    }

    match candidates.as_slice() {
        [] => Err(usage_err("No serial ports available")),
        [only] if only.is_usb() => {
            info!("Auto-selected port: {}", only.describe());
            Ok(SelectedPort::new(&only.name, PortSource::Detected))
        },
        [only] => {
            ensure_interactive_terminal()?;
            confirm_single_port(only)
        },
        _ => {
            ensure_interactive_terminal()?;
            select_port_interactive(&candidates)
        },
    }
}

/// Narrow the detected ports to USB devices when there are any.
fn candidate_ports(ports: Vec<PortInfo>) -> Vec<PortInfo> {
    let (usb, other): (Vec<_>, Vec<_>) = ports
        .into_iter()
        .partition(PortInfo::is_usb);
    if usb.is_empty() { other } else { usb }
}

/// The port auto-detection would pick without asking, if there is one.
pub fn preferred_port(ports: &[PortInfo]) -> Option<&PortInfo> {
    let usb: Vec<&PortInfo> = ports
        .iter()
        .filter(|p| p.is_usb())
        .collect();
    match (usb.as_slice(), ports) {
        ([only], _) => Some(*only),
        ([], [only]) => Some(only),
        _ => None,
    }
}

fn select_non_interactive_port(candidates: Vec<PortInfo>) -> Result<SelectedPort> {
    // Deterministic: exactly one candidate is a valid auto-selection.
    match candidates.as_slice() {
        [only] => Ok(SelectedPort::new(&only.name, PortSource::Detected)),
        [] => Err(usage_err("No serial ports available")),
        many => Err(usage_err(&format!(
            "Found multiple serial ports ({}); pass --port in non-interactive mode",
            many.len()
        ))),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "Port selection needs an interactive terminal; pass --port".to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("Prompt failed: {io_err}")).into()
            }
        },
    }
}

/// Menu label for a port, truncated to `max_width` columns.
fn port_label(port: &PortInfo, max_width: usize) -> String {
    let name = if port.is_usb() {
        style(&port.name)
            .bold()
            .to_string()
    } else {
        port.name
            .clone()
    };

    let ids = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };

    let product = port
        .product
        .as_ref()
        .or(port.manufacturer.as_ref())
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    console::truncate_str(&format!("{name}{ids}{product}"), max_width, "\u{2026}").into_owned()
}

/// Interactive port selection.
fn select_port_interactive(ports: &[PortInfo]) -> Result<SelectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Keep labels on one line in narrow terminals.
    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| port_label(port, max_item_width))
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .get(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort::new(&port.name, PortSource::Detected))
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Confirm use of a single non-USB port.
fn confirm_single_port(port: &PortInfo) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", port.describe()))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort::new(&port.name, PortSource::Detected))
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}

/// Ask user if they want to remember a detected port.
pub fn ask_remember_port(selected: &SelectedPort, config: &mut Config) -> Result<()> {
    if selected.source != PortSource::Detected || !std::io::stdin().is_terminal() {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {} as the default port?", selected.name))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(&selected.name) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, console::measure_text_width};

    fn port(name: &str, usb: bool) -> PortInfo {
        PortInfo {
            name: name.into(),
            vid: usb.then_some(0x1209),
            pid: usb.then_some(0x0001),
            manufacturer: None,
            product: usb.then(|| "Handheld".to_string()),
            serial_number: None,
        }
    }

    fn is_usage(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_)))
    }

    #[test]
    fn test_explicit_port_wins_over_config() {
        let options = SerialOptions {
            port: Some("/dev/ttyACM3".into()),
            non_interactive: true,
        };
        let selected = select_serial_port(&options, Some("/dev/ttyACM0")).unwrap();
        assert_eq!(selected, SelectedPort::new("/dev/ttyACM3", PortSource::Explicit));
    }

    #[test]
    fn test_config_port_used_without_flag() {
        let selected = select_serial_port(&SerialOptions::default(), Some("COM4")).unwrap();
        assert_eq!(selected, SelectedPort::new("COM4", PortSource::Config));
    }

    #[test]
    fn test_candidate_ports_prefer_usb() {
        let ports = vec![port("/dev/ttyS0", false), port("/dev/ttyACM0", true)];
        let names: Vec<_> = candidate_ports(ports)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["/dev/ttyACM0"]);
    }

    #[test]
    fn test_candidate_ports_fall_back_to_all() {
        let ports = vec![port("/dev/ttyS0", false), port("/dev/ttyS1", false)];
        assert_eq!(candidate_ports(ports).len(), 2);
    }

    #[test]
    fn test_preferred_port() {
        let ports = vec![port("/dev/ttyS0", false), port("/dev/ttyACM0", true)];
        assert_eq!(
            preferred_port(&ports).map(|p| p.name.as_str()),
            Some("/dev/ttyACM0")
        );

        let ports = vec![port("/dev/ttyACM0", true), port("/dev/ttyACM1", true)];
        assert!(preferred_port(&ports).is_none());

        let ports = vec![port("/dev/ttyS0", false)];
        assert_eq!(
            preferred_port(&ports).map(|p| p.name.as_str()),
            Some("/dev/ttyS0")
        );
        assert!(preferred_port(&[]).is_none());
    }

    #[test]
    fn test_non_interactive_single_candidate() {
        let selected = select_non_interactive_port(vec![port("/dev/ttyACM0", true)]).unwrap();
        assert_eq!(selected, SelectedPort::new("/dev/ttyACM0", PortSource::Detected));
    }

    #[test]
    fn test_non_interactive_multiple_is_usage_error() {
        let err = select_non_interactive_port(vec![
            port("/dev/ttyACM0", true),
            port("/dev/ttyACM1", true),
        ])
        .unwrap_err();
        assert!(is_usage(&err));
        assert!(err.to_string().contains("multiple"));
    }

    #[test]
    fn test_non_interactive_none_is_usage_error() {
        let err = select_non_interactive_port(Vec::new()).unwrap_err();
        assert!(is_usage(&err));
    }

    #[test]
    fn test_port_label_contains_ids_and_product() {
        let label = console::strip_ansi_codes(&port_label(&port("/dev/ttyACM0", true), 200))
            .into_owned();
        assert_eq!(label, "/dev/ttyACM0 (1209:0001) - Handheld");
    }

    #[test]
    fn test_port_label_truncates_to_width() {
        let label = port_label(&port("/dev/ttyACM0", true), 12);
        assert!(measure_text_width(&label) <= 12);
        assert!(console::strip_ansi_codes(&label).ends_with('\u{2026}'));
    }

    #[test]
    fn test_opener_records_selection() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyACM9".into());
        let mut opener = CliPortOpener::new(SerialOptions::default(), &config);

        assert_eq!(opener.select_port().unwrap(), "/dev/ttyACM9");
        assert_eq!(
            opener.selected(),
            Some(&SelectedPort::new("/dev/ttyACM9", PortSource::Config))
        );
        assert!(opener.take_failure().is_none());
    }

    #[test]
    fn test_remember_skips_explicit_ports() {
        let mut config = Config::default();
        let selected = SelectedPort::new("/dev/ttyACM0", PortSource::Explicit);
        ask_remember_port(&selected, &mut config).unwrap();
        assert!(config.connection.port.is_none());
    }
}
