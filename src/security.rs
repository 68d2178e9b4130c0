#![forbid(unsafe_code)]

//! Startup privilege check.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start when running as root. Downloads are staged in shared
/// scratch directories, and a root process would leave root-owned files
/// behind while masking permission mistakes.
pub fn ensure_not_root(process: &str) -> Result<()> {
    reject_root_uid(Uid::current(), process)
}

fn reject_root_uid(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} refuses to run as root; start it from an unprivileged account");
    }
    Ok(())
}
