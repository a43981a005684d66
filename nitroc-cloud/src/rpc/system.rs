use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{error, warn};

use super::handler::RpcHandler;

/// Grace period before a system command runs, leaves time to acknowledge
/// the request
pub const SYSTEM_ACTION_DELAY: Duration = Duration::from_secs(5);

/// Runs a system command after a delay
///
/// The handler reports success as soon as the command is scheduled, the
/// outcome of the command itself is only logged.
#[derive(Debug, Clone)]
pub struct SystemAction {
    method: String,
    program: String,
    args: Vec<String>,
    delay: Duration,
}

impl SystemAction {
    pub fn new(method: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            program: program.into(),
            args: Vec::new(),
            delay: SYSTEM_ACTION_DELAY,
        }
    }

    pub fn reboot() -> Self {
        Self::new("reboot", "reboot")
    }

    pub fn poweroff() -> Self {
        Self::new("poweroff", "poweroff")
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl RpcHandler for SystemAction {
    fn method(&self) -> &str {
        &self.method
    }

    fn run(&self, _params: &Value) -> bool {
        let Self {
            method,
            program,
            args,
            delay,
        } = self.clone();

        let Ok(runtime) = Handle::try_current() else {
            error!("cannot schedule {method} outside of a runtime");
            return false;
        };

        warn!("running {method} in {delay:?}");
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            warn!("running {method} now");
            match Command::new(&program).args(&args).status().await {
                Ok(status) if status.success() => {}
                Ok(status) => error!("{program} exited with {status}"),
                Err(e) => error!("failed to run {program}: {e}"),
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn it_names_the_system_actions() {
        assert_eq!(SystemAction::reboot().method(), "reboot");
        assert_eq!(SystemAction::poweroff().method(), "poweroff");
        assert_eq!(SystemAction::reboot().delay, SYSTEM_ACTION_DELAY);
    }

    #[tokio::test]
    async fn it_runs_the_command_after_the_delay() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");

        let action = SystemAction::new("touch", "touch")
            .with_args([marker.to_string_lossy().into_owned()])
            .with_delay(Duration::from_millis(100));

        assert!(action.run(&json!(null)));
        assert!(!marker.exists());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn it_succeeds_even_if_the_command_fails() {
        let action = SystemAction::new("missing", "/nonexistent/command")
            .with_delay(Duration::from_millis(0));
        assert!(action.run(&json!({})));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
