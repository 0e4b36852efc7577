//! Commands that operate on the device file system.

use {
    super::{DeviceSession, ensure_not_interrupted, open_session},
    crate::{Cli, CliError, config::Config, use_fancy_output},
    anyhow::{Context, Result},
    console::style,
    devlink::{FileEntry, protocol::message::join_path},
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Run `op` on a fresh session and always release the port afterwards.
fn with_session<T>(
    cli: &Cli,
    config: &mut Config,
    silent: bool,
    op: impl FnOnce(&mut DeviceSession) -> Result<T>,
) -> Result<T> {
    let mut session = open_session(cli, config, silent)?;
    let result = op(&mut session);
    session.disconnect();
    result
}

fn done(cli: &Cli, message: &str) {
    if !cli.quiet {
        eprintln!("{} {message}", style("✓").green());
    }
}

/// Version command implementation.
pub(crate) fn cmd_version(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let info = with_session(cli, config, cli.quiet || json, |session| {
        session
            .get_version()
            .context("Failed to read firmware version")
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Firmware: {}", info.version);
        if let Some(hardware) = &info.hardware {
            println!("Hardware: {hardware}");
        }
    }
    Ok(())
}

/// One listing line: size column, then the name with directories highlighted.
pub(crate) fn format_entry(entry: &FileEntry) -> String {
    if entry.is_directory {
        format!(
            "{:>10}  {}",
            "<DIR>",
            style(&entry.name)
                .blue()
                .bold()
        )
    } else {
        format!("{:>10}  {}", entry.size, entry.name)
    }
}

/// List command implementation.
pub(crate) fn cmd_ls(cli: &Cli, config: &mut Config, path: &str, json: bool) -> Result<()> {
    let entries = with_session(cli, config, cli.quiet || json, |session| {
        session
            .list_folder(path)
            .with_context(|| format!("Failed to list {path}"))
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    if !cli.quiet {
        eprintln!(
            "{}",
            style(format!("{} entries in {path}", entries.len())).dim()
        );
    }
    Ok(())
}

/// Stat command implementation.
pub(crate) fn cmd_stat(cli: &Cli, config: &mut Config, path: &str, json: bool) -> Result<()> {
    let entry = with_session(cli, config, cli.quiet || json, |session| {
        session
            .get_file_info(path)
            .with_context(|| format!("Failed to stat {path}"))
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!("Name:     {}", entry.display_name());
        println!(
            "Type:     {}",
            if entry.is_directory { "directory" } else { "file" }
        );
        println!("Size:     {} bytes", entry.size);
        println!("Modified: {} (Unix seconds)", entry.last_modified);
    }
    Ok(())
}

/// Last path component of a device path, if any.
fn remote_file_name(remote: &str) -> Option<&str> {
    remote
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}

/// Where `pull` writes: `local`, a file inside `local` if it is a directory,
/// or the remote file name in the working directory.
pub(crate) fn local_target(remote: &str, local: Option<&Path>) -> Result<PathBuf> {
    let name = || {
        remote_file_name(remote).ok_or_else(|| {
            anyhow::Error::from(CliError::Usage(format!(
                "Cannot derive a local file name from {remote}; pass LOCAL"
            )))
        })
    };

    match local {
        Some(dir) if dir.is_dir() => Ok(dir.join(name()?)),
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(PathBuf::from(name()?)),
    }
}

/// Where `push` writes on the device: `remote`, or the local file name inside
/// `remote` when it ends with `/`.
pub(crate) fn remote_target(local: &Path, remote: &str) -> Result<String> {
    if !remote.ends_with('/') {
        return Ok(remote.to_string());
    }
    let name = local
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            CliError::Usage(format!(
                "Cannot derive a remote file name from {}",
                local.display()
            ))
        })?;
    Ok(join_path(remote, name))
}

fn spinner(cli: &Cli, message: String) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn transfer_bar(cli: &Cli, message: String) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_message(message);
    pb
}

/// Pull command implementation.
pub(crate) fn cmd_pull(
    cli: &Cli,
    config: &mut Config,
    remote: &str,
    local: Option<&Path>,
) -> Result<()> {
    let target = local_target(remote, local)?;

    let data = with_session(cli, config, cli.quiet, |session| {
        let pb = spinner(cli, format!("Reading {remote}"));
        let result = session
            .read_file(remote)
            .with_context(|| format!("Failed to read {remote}"));
        pb.finish_and_clear();
        result
    })?;
    ensure_not_interrupted()?;

    fs::write(&target, &data)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    done(
        cli,
        &format!("Saved {} bytes to {}", data.len(), target.display()),
    );
    Ok(())
}

/// Push command implementation.
pub(crate) fn cmd_push(cli: &Cli, config: &mut Config, local: &Path, remote: &str) -> Result<()> {
    let data =
        fs::read(local).with_context(|| format!("Failed to read {}", local.display()))?;
    let target = remote_target(local, remote)?;

    with_session(cli, config, cli.quiet, |session| {
        let pb = transfer_bar(cli, target.clone());
        let result = session.write_file(&target, &data, |percent| {
            pb.set_position(u64::from(percent));
        });
        match result {
            Ok(()) => {
                pb.finish_with_message("complete");
                Ok(())
            },
            Err(err) => {
                pb.abandon();
                Err(err).with_context(|| {
                    format!("Transfer to {target} aborted; the device copy may be incomplete")
                })
            },
        }
    })?;

    done(cli, &format!("Wrote {} bytes to {target}", data.len()));
    Ok(())
}

/// Remove command implementation.
pub(crate) fn cmd_rm(cli: &Cli, config: &mut Config, path: &str) -> Result<()> {
    with_session(cli, config, cli.quiet, |session| {
        session
            .delete_file(path)
            .with_context(|| format!("Failed to delete {path}"))
    })?;
    done(cli, &format!("Deleted {path}"));
    Ok(())
}

/// Make-directory command implementation.
pub(crate) fn cmd_mkdir(cli: &Cli, config: &mut Config, path: &str) -> Result<()> {
    with_session(cli, config, cli.quiet, |session| {
        session
            .make_directory(path)
            .with_context(|| format!("Failed to create {path}"))
    })?;
    done(cli, &format!("Created {path}"));
    Ok(())
}

/// Move/rename command implementation.
pub(crate) fn cmd_mv(cli: &Cli, config: &mut Config, from: &str, to: &str) -> Result<()> {
    with_session(cli, config, cli.quiet, |session| {
        session
            .rename_file(from, to)
            .with_context(|| format!("Failed to rename {from} to {to}"))
    })?;
    done(cli, &format!("Renamed {from} to {to}"));
    Ok(())
}

/// Reboot command implementation.
pub(crate) fn cmd_reboot(cli: &Cli, config: &mut Config) -> Result<()> {
    with_session(cli, config, cli.quiet, |session| {
        session
            .reboot()
            .context("Failed to send reboot request")
    })?;
    done(cli, "Reboot requested");
    Ok(())
}
