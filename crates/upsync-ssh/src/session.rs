//! Blocking libssh2 session handling
//!
//! Everything here runs on tokio's blocking pool.

use crate::settings::SshSettings;
use ssh2::{Channel, CheckResult, ExtendedData, KnownHostFileKind, Session};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use tokio::sync::oneshot;
use upsync_core::{HostKeyPolicy, TransportError};

pub(crate) type ExitSender = oneshot::Sender<Result<i32, TransportError>>;
pub(crate) type StartSender = oneshot::Sender<Result<(), TransportError>>;

/// Connect, check the host key and authenticate
pub(crate) fn open_session(settings: &SshSettings) -> Result<Session, TransportError> {
    let connect_error = |message: String| TransportError::Connect {
        host: settings.host.clone(),
        port: settings.port,
        message,
    };

    let tcp = TcpStream::connect((settings.host.as_str(), settings.port))
        .map_err(|e| connect_error(e.to_string()))?;
    let mut session = Session::new().map_err(|e| connect_error(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| connect_error(e.to_string()))?;

    verify_host_key(&session, settings)?;

    session
        .userauth_password(&settings.username, &settings.password)
        .map_err(|e| {
            tracing::debug!(error = %e, "password authentication rejected");
            TransportError::Authentication {
                username: settings.username.clone(),
            }
        })?;
    if !session.authenticated() {
        return Err(TransportError::Authentication {
            username: settings.username.clone(),
        });
    }

    tracing::debug!(host = %settings.host, port = settings.port, "ssh session established");
    Ok(session)
}

fn verify_host_key(session: &Session, settings: &SshSettings) -> Result<(), TransportError> {
    let path = match settings.host_key_policy {
        HostKeyPolicy::AcceptAny => return Ok(()),
        HostKeyPolicy::KnownHosts => settings
            .known_hosts_path
            .as_deref()
            .ok_or_else(|| TransportError::HostKey("no known_hosts file configured".to_string()))?,
    };

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| TransportError::HostKey(e.to_string()))?;
    known_hosts
        .read_file(path, KnownHostFileKind::OpenSSH)
        .map_err(|e| TransportError::HostKey(format!("cannot read {}: {e}", path.display())))?;

    let (key, _) = session
        .host_key()
        .ok_or_else(|| TransportError::HostKey("server presented no host key".to_string()))?;

    match known_hosts.check_port(&settings.host, settings.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(TransportError::HostKey(format!(
            "key for {} does not match {}",
            settings.host,
            path.display()
        ))),
        CheckResult::NotFound => Err(TransportError::HostKey(format!(
            "{} is not listed in {}",
            settings.host,
            path.display()
        ))),
        CheckResult::Failure => Err(TransportError::HostKey(
            "known_hosts lookup failed".to_string(),
        )),
    }
}

fn close(session: &Session) {
    if let Err(e) = session.disconnect(None, "upsync done", None) {
        tracing::debug!(error = %e, "ssh disconnect failed");
    }
}

fn channel_error(err: &ssh2::Error) -> TransportError {
    TransportError::Channel(err.to_string())
}

/// Write `contents` to `remote_path` over a fresh SFTP session
pub(crate) fn upload(
    settings: &SshSettings,
    remote_path: &str,
    contents: &[u8],
) -> Result<(), TransportError> {
    let session = open_session(settings)?;
    let result = write_file(&session, remote_path, contents);
    close(&session);
    result
}

fn write_file(session: &Session, remote_path: &str, contents: &[u8]) -> Result<(), TransportError> {
    let sftp = session.sftp().map_err(|e| channel_error(&e))?;
    let mut file = sftp
        .create(Path::new(remote_path))
        .map_err(|e| channel_error(&e))?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(())
}

/// Run `command` over a fresh exec channel
///
/// Reports start-up on `started`, then blocks until the remote side closes
/// the channel and reports the exit status on `exit`.
pub(crate) fn run_command(
    settings: &SshSettings,
    command: &str,
    started: StartSender,
    exit: ExitSender,
) {
    let session = match open_session(settings) {
        Ok(session) => session,
        Err(e) => {
            let _ = started.send(Err(e));
            return;
        }
    };

    let mut channel = match session.channel_session() {
        Ok(channel) => channel,
        Err(e) => {
            let _ = started.send(Err(channel_error(&e)));
            close(&session);
            return;
        }
    };
    // Stderr shares the stdout stream so a chatty command cannot fill the
    // window of a stream nobody is reading
    let exec = channel
        .handle_extended_data(ExtendedData::Merge)
        .and_then(|()| channel.exec(command));
    if let Err(e) = exec {
        let _ = started.send(Err(channel_error(&e)));
        close(&session);
        return;
    }
    if started.send(Ok(())).is_err() {
        // Caller went away before the command started
        close(&session);
        return;
    }

    session.set_timeout(settings.command_timeout_ms());

    let result = wait_for_exit(&mut channel, command);
    close(&session);
    let _ = exit.send(result);
}

/// Drain merged output and collect the exit status once the channel closes
fn wait_for_exit(channel: &mut Channel, command: &str) -> Result<i32, TransportError> {
    let output = drain_output(channel)?;
    channel.wait_close().map_err(|e| channel_error(&e))?;
    let status = channel.exit_status().map_err(|e| channel_error(&e))?;

    if !output.trim().is_empty() {
        tracing::debug!(command, output = %output.trim(), "remote command output");
    }
    Ok(status)
}

/// Read to end of stream; output need not be UTF-8
fn drain_output(reader: &mut impl Read) -> Result<String, TransportError> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn drain_reads_past_channel_window() {
        // Larger than libssh2's default 2 MiB channel window
        let mut reader = Cursor::new(vec![b'e'; 3 * 1024 * 1024]);
        let output = drain_output(&mut reader).unwrap();
        assert_eq!(output.len(), 3 * 1024 * 1024);
    }

    #[test]
    fn drain_tolerates_non_utf8_output() {
        let mut reader = Cursor::new(b"nginx: [warn] \xff\xfe\n".to_vec());
        let output = drain_output(&mut reader).unwrap();
        assert!(output.starts_with("nginx: [warn]"));
    }
}
