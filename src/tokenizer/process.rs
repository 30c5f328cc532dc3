//! Tokenization service child process lifecycle.
//!
//! One process per locale, recycled on language switch. The service may
//! fork tokenizer workers, so it is spawned in its own process group and
//! teardown signals the whole group.

use std::path::Path;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::TokenizerError;

#[derive(Debug)]
pub struct TokenizerProcess {
    child: Child,
    pid: u32,
    locale: String,
}

impl TokenizerProcess {
    /// Launch `{binary} {locale}`.
    pub fn spawn(binary: &Path, locale: &str) -> Result<Self, TokenizerError> {
        let mut cmd = Command::new(binary);
        cmd.arg(locale).kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| TokenizerError::Spawn(format!("{}: {e}", binary.display())))?;
        let pid = child
            .id()
            .ok_or_else(|| TokenizerError::Spawn("process exited before start".into()))?;

        info!("tokenization service up for {locale} (pid {pid})");
        Ok(Self {
            child,
            pid,
            locale: locale.to_string(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Kill the whole process group and reap the child. The group kill
    /// covers tokenizer workers the service may have forked.
    pub async fn kill_tree(mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Err(e) = killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
                warn!("killpg({}) failed: {e}", self.pid);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
        let _ = self.child.wait().await;
        info!("tokenization service for {} (pid {}) terminated", self.locale, self.pid);
    }
}
