use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Instant;

use super::{with_hard_timeout, ProbeError, ProbeResult, ProbeTarget, Prober};
use crate::config::ProbeConfig;
use crate::context::Context;

#[derive(Debug, Default)]
pub struct ExecProber;

impl Prober for ExecProber {
    fn probe(&self, _target: &ProbeTarget, config: &ProbeConfig, _cancel: &Context) -> ProbeResult {
        if config.command.is_empty() {
            return ProbeResult::failed(std::time::Duration::ZERO, ProbeError::EmptyCommand);
        }

        let command = config.command.clone();
        let args = config.args.clone();
        let timeout = config.timeout;

        with_hard_timeout(timeout, move || {
            let start = Instant::now();
            let child = Command::new(&command)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn();

            let mut child = match child {
                Ok(child) => child,
                Err(err) => {
                    return ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string()))
                }
            };

            let mut stdout = String::new();
            if let Some(mut handle) = child.stdout.take() {
                let _ = handle.read_to_string(&mut stdout);
            }

            match child.wait() {
                Ok(status) if status.success() => ProbeResult::ok(start.elapsed(), stdout),
                Ok(status) => ProbeResult::failed(
                    start.elapsed(),
                    ProbeError::Other(format!("exit status {status}")),
                ),
                Err(err) => ProbeResult::failed(start.elapsed(), ProbeError::Other(err.to_string())),
            }
        })
    }
}
