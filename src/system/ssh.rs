// src/system/ssh.rs

use crate::core::paths;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Host entries written by devx live in `~/.ssh/.devx/<host>`.
const SSH_INCLUDE_SUBDIR: &str = ".devx";

/// Ephemeral port range used for derived SSH ports.
const DYNAMIC_PORT_START: u16 = 49152;
const DYNAMIC_PORT_END: u16 = 65535;

/// Maps a name (e.g. a container name) to a stable port in the dynamic range.
pub fn derive_dynamic_port(name: &str) -> u16 {
    let digest = blake3::hash(name.as_bytes());
    let mut prefix = [0u8; 2];
    prefix.copy_from_slice(digest.as_bytes().get(..2).unwrap_or(&[0, 0]));
    let span = u32::from(DYNAMIC_PORT_END - DYNAMIC_PORT_START) + 1;
    let offset = u32::from(u16::from_be_bytes(prefix)) % span;
    // offset < span <= u16::MAX - DYNAMIC_PORT_START + 1
    DYNAMIC_PORT_START + u16::try_from(offset).unwrap_or(0)
}

/// `ssh` invocation that forwards the agent, allocates a TTY and stops
/// option parsing before the remote command.
pub fn base_command(destination: &str, port: u16) -> Vec<String> {
    vec![
        "ssh".to_string(),
        "-A".to_string(),
        "-q".to_string(),
        "-t".to_string(),
        "-p".to_string(),
        port.to_string(),
        destination.to_string(),
        "--".to_string(),
    ]
}

/// Full `ssh` argv running `command` in `workdir` on the remote side.
pub fn remote_command(destination: &str, port: u16, workdir: &str, command: &[String]) -> Vec<String> {
    let joined = shlex::try_join(command.iter().map(String::as_str))
        .unwrap_or_else(|_| command.join(" "));
    let quoted_dir = shlex::try_quote(workdir)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| workdir.to_string());
    let mut argv = base_command(destination, port);
    argv.push(format!("cd {quoted_dir} && {joined}"));
    argv
}

pub fn default_ssh_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh"))
}

/// Writes a `Host` block for `hostname` and makes sure the main config
/// includes it.
pub fn write_host_config(ssh_dir: &Path, hostname: &str, options: &[(&str, &str)]) -> io::Result<PathBuf> {
    let mut lines = vec![format!("Host {hostname}")];
    lines.extend(options.iter().map(|(key, value)| format!("    {key} {value}")));
    lines.push(String::new());

    let target = ssh_dir.join(SSH_INCLUDE_SUBDIR).join(hostname);
    paths::write_atomic(&target, lines.join("\n").as_bytes())?;
    ensure_config_inclusion(ssh_dir)?;
    Ok(target)
}

/// Prepends `Include .devx/*` to `~/.ssh/config` once.
pub fn ensure_config_inclusion(ssh_dir: &Path) -> io::Result<()> {
    let config = ssh_dir.join("config");
    let expected = format!("Include {SSH_INCLUDE_SUBDIR}/*");
    let existing = match fs::read_to_string(&config) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    if existing.lines().any(|line| line.trim() == expected) {
        return Ok(());
    }

    let mut updated = expected;
    updated.push('\n');
    updated.push_str(&existing);
    if !updated.ends_with('\n') {
        updated.push('\n');
    }
    paths::write_atomic(&config, updated.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_port_is_stable_and_in_range() {
        let first = derive_dynamic_port("devx-linux-container-default");
        let second = derive_dynamic_port("devx-linux-container-default");

        assert_eq!(first, second);
        assert!(first >= DYNAMIC_PORT_START);
    }

    #[test]
    fn test_remote_command_quotes_arguments() {
        let argv = remote_command(
            "root@localhost",
            50000,
            "/root/repos/my repo",
            &["echo".to_string(), "a b".to_string()],
        );

        assert_eq!(argv[..7], base_command("root@localhost", 50000)[..7]);
        assert_eq!(argv.last().unwrap(), "cd '/root/repos/my repo' && echo 'a b'");
    }

    #[test]
    fn test_host_config_and_inclusion_are_idempotent() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config"), "Host github.com\n    User git\n").unwrap();

        // --- Execute ---
        let written = write_host_config(dir.path(), "localhost", &[("ForwardAgent", "yes")]).unwrap();
        write_host_config(dir.path(), "localhost", &[("ForwardAgent", "yes")]).unwrap();

        // --- Assert ---
        let host = fs::read_to_string(written).unwrap();
        assert_eq!(host, "Host localhost\n    ForwardAgent yes\n");
        let config = fs::read_to_string(dir.path().join("config")).unwrap();
        assert_eq!(config.matches("Include .devx/*").count(), 1);
        assert!(config.starts_with("Include .devx/*\nHost github.com"));
    }
}
