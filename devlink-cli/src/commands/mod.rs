//! Command implementations.
//!
//! Each command family is implemented in its own module. Commands that talk
//! to a device open their session through [`open_session`].

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod ports;

use {
    crate::{
        Cli, CliError,
        config::Config,
        serial::{CliPortOpener, SerialOptions, ask_remember_port},
        was_interrupted,
    },
    anyhow::{Context, Result},
    console::style,
    devlink::{DisconnectReason, Session, SessionConfig},
    log::warn,
    std::time::Duration,
};

/// Session type used by every device command.
pub(crate) type DeviceSession = Session<CliPortOpener>;

pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Session settings from flags, environment and configuration.
pub(crate) fn session_config(cli: &Cli, config: &Config) -> SessionConfig {
    let mut session_config = SessionConfig::default();
    if let Some(baud) = cli
        .baud
        .or(config.connection.baud)
    {
        session_config = session_config.with_baud_rate(baud);
    }
    if let Some(secs) = cli
        .timeout
        .or(config.connection.timeout_secs)
    {
        session_config = session_config.with_request_timeout(Duration::from_secs(secs));
    }
    if let Some(chunk_size) = config
        .transfer
        .chunk_size
    {
        session_config = session_config.with_chunk_size(chunk_size);
    }
    session_config
}

/// Select a port, connect, and offer to remember an auto-detected port.
///
/// `silent` suppresses status lines (quiet mode and JSON output).
pub(crate) fn open_session(cli: &Cli, config: &mut Config, silent: bool) -> Result<DeviceSession> {
    config.validate()?;
    if cli.timeout == Some(0) {
        return Err(CliError::Usage("--timeout must be greater than 0".to_string()).into());
    }

    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        non_interactive: cli.non_interactive,
    };
    let opener = CliPortOpener::new(options, config);
    let mut session = Session::with_config(opener, session_config(cli, config));
    session.set_disconnect_handler(|reason| {
        if let DisconnectReason::TransportError(message) = reason {
            warn!("Connection lost: {message}");
        }
    });

    if let Err(err) = session.connect(None) {
        if let Some(failure) = session
            .opener_mut()
            .take_failure()
        {
            return Err(failure);
        }
        let port = session
            .opener()
            .selected()
            .map(|selected| selected.name.clone())
            .unwrap_or_default();
        return Err(err).with_context(|| format!("Failed to open {port}"));
    }
    ensure_not_interrupted()?;

    if !silent {
        eprintln!(
            "{} Connected to {} at {} baud",
            style("🔌").cyan(),
            session
                .last_port()
                .unwrap_or_default(),
            session
                .last_baud()
                .unwrap_or_default()
        );
    }

    if !cli.non_interactive {
        if let Some(selected) = session
            .opener()
            .selected()
            .cloned()
        {
            ask_remember_port(&selected, config)?;
        }
    }

    Ok(session)
}

#[cfg(test)]
mod tests {
    use {super::*, clap::Parser};

    #[test]
    fn test_session_config_defaults() {
        let cli = Cli::try_parse_from(["devlink", "version"]).unwrap();
        let session_config = session_config(&cli, &Config::default());
        assert_eq!(session_config.baud_rate, 115200);
        assert_eq!(session_config.request_timeout, Duration::from_secs(30));
        assert_eq!(session_config.chunk_size, devlink::protocol::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_session_config_flags_override_config() {
        let cli =
            Cli::try_parse_from(["devlink", "--baud", "921600", "--timeout", "5", "version"])
                .unwrap();
        let mut config = Config::default();
        config.connection.baud = Some(9600);
        config.connection.timeout_secs = Some(60);
        config.transfer.chunk_size = Some(1024);

        let session_config = session_config(&cli, &config);
        assert_eq!(session_config.baud_rate, 921600);
        assert_eq!(session_config.request_timeout, Duration::from_secs(5));
        assert_eq!(session_config.chunk_size, 1024);
    }

    #[test]
    fn test_session_config_uses_config_when_flags_absent() {
        let cli = Cli::try_parse_from(["devlink", "version"]).unwrap();
        let mut config = Config::default();
        config.connection.baud = Some(9600);
        assert_eq!(session_config(&cli, &config).baud_rate, 9600);
    }
}
