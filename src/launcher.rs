use std::{
    io::ErrorKind,
    path::PathBuf,
    process::{Command, Stdio},
};

use tracing::{debug, info};

use crate::{
    askpass::{self, SECRET_VAR, TARGET_VAR},
    error::{Error, ExitState},
    plan::{Auth, ConnectionPlan, Endpoint, DEFAULT_SSH_PORT},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    OpenShell,
    /// Copy a local file up, then open a shell.
    Upload { local: String, remote: String },
    /// Copy a remote file down. No shell afterwards.
    Download { remote: String, local: String },
}

/// Runs a prepared external command to completion.
pub trait ProcessRunner {
    fn run(&mut self, command: Command) -> Result<ExitState, std::io::Error>;
}

/// Runs commands attached to the current terminal.
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&mut self, mut command: Command) -> Result<ExitState, std::io::Error> {
        let status = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        Ok(match status.code() {
            Some(code) => ExitState::Code(code),
            None => ExitState::Signal,
        })
    }
}

pub struct Launcher<R: ProcessRunner> {
    runner: R,
    askpass_program: PathBuf,
    set_display: bool,
}

impl<R: ProcessRunner> Launcher<R> {
    /// `askpass_program` is the executable ssh runs to obtain the password,
    /// normally this binary.
    pub fn new(runner: R, askpass_program: PathBuf) -> Self {
        Self {
            runner,
            askpass_program,
            // OpenSSH before 8.4 ignores SSH_ASKPASS without a DISPLAY
            set_display: std::env::var_os("DISPLAY").is_none(),
        }
    }

    pub fn launch(&mut self, plan: &ConnectionPlan, action: &Action) -> Result<(), Error> {
        let name = plan.destination().target();
        let via = plan
            .jump()
            .map(|jump| format!(" via jump server {}", jump.host))
            .unwrap_or_default();

        match action {
            Action::OpenShell => {}
            Action::Upload { local, remote } => {
                info!("Uploading {local} to {name}:{remote}{via}...");
                let to = remote_spec(plan.destination(), remote);
                let cmd = self.scp_command(plan, local, &to);
                self.execute(cmd, "upload")?;
                info!("Upload complete");
            }
            Action::Download { remote, local } => {
                info!("Downloading {name}:{remote} to {local}{via}...");
                let from = remote_spec(plan.destination(), remote);
                let cmd = self.scp_command(plan, &from, local);
                self.execute(cmd, "download")?;
                info!("Download complete");
                return Ok(());
            }
        }

        info!("Opening SSH session to {name}{via}...");
        let cmd = self.ssh_command(plan);
        self.execute(cmd, "ssh session")
    }

    pub fn ssh_command(&self, plan: &ConnectionPlan) -> Command {
        let mut cmd = Command::new("ssh");
        let dest = plan.destination();
        if dest.port != DEFAULT_SSH_PORT {
            cmd.arg("-p").arg(dest.port.to_string());
        }
        if let Some(jump) = plan.jump() {
            cmd.arg("-J").arg(jump.jump_spec());
        }
        cmd.arg(dest.target());
        self.apply_auth(&mut cmd, plan);
        cmd
    }

    pub fn scp_command(&self, plan: &ConnectionPlan, from: &str, to: &str) -> Command {
        let mut cmd = Command::new("scp");
        let dest = plan.destination();
        if dest.port != DEFAULT_SSH_PORT {
            cmd.arg("-P").arg(dest.port.to_string());
        }
        if let Some(jump) = plan.jump() {
            cmd.arg("-J").arg(jump.jump_spec());
        }
        cmd.arg(from).arg(to);
        self.apply_auth(&mut cmd, plan);
        cmd
    }

    fn apply_auth(&self, cmd: &mut Command, plan: &ConnectionPlan) {
        match plan.auth() {
            Auth::Password(secret) => {
                cmd.envs(askpass::askpass_env(
                    &self.askpass_program,
                    secret,
                    &plan.destination().target(),
                ));
                if self.set_display {
                    cmd.env("DISPLAY", ":0");
                }
            }
            Auth::KeyOrAgent => {
                cmd.env_remove(SECRET_VAR).env_remove(TARGET_VAR);
            }
        }
    }

    fn execute(&mut self, cmd: Command, purpose: &str) -> Result<(), Error> {
        debug!("running {:?} {:?}", cmd.get_program(), cmd.get_args().collect::<Vec<_>>());
        let status = match self.runner.run(cmd) {
            Ok(status) => status,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::ExternalProcessFailed {
                    purpose: format!("{purpose} (program not found)"),
                    status: ExitState::NotStarted,
                })
            }
            Err(err) => return Err(err.into()),
        };

        match status {
            ExitState::Code(0) => Ok(()),
            status => Err(Error::ExternalProcessFailed {
                purpose: purpose.to_string(),
                status,
            }),
        }
    }
}

/// `user@host:path`, with IPv6 literals bracketed the way scp wants them.
fn remote_spec(dest: &Endpoint, path: &str) -> String {
    if dest.host.contains(':') {
        format!("{}@[{}]:{}", dest.user, dest.host, path)
    } else {
        format!("{}:{}", dest.target(), path)
    }
}
