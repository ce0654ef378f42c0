//! Password hand-off to OpenSSH through `SSH_ASKPASS`.
//!
//! ssh and scp are started with `SSH_ASKPASS` pointing back at this binary.
//! When ssh needs an answer it runs us with the prompt as the only argument;
//! [`answer_from_env`] detects that and replies without touching the store,
//! the vault or the terminal.

use std::{
    ffi::OsString,
    io::{self, Write},
    path::Path,
};

use crate::secret::Secret;

pub const SECRET_VAR: &str = "SSHHOP_ASKPASS_SECRET";
pub const TARGET_VAR: &str = "SSHHOP_ASKPASS_TARGET";

/// Environment that makes ssh ask `program` for the password of `target`.
pub fn askpass_env(program: &Path, secret: &Secret, target: &str) -> Vec<(OsString, OsString)> {
    vec![
        ("SSH_ASKPASS".into(), program.as_os_str().to_owned()),
        ("SSH_ASKPASS_REQUIRE".into(), "force".into()),
        (SECRET_VAR.into(), secret.expose().into()),
        (TARGET_VAR.into(), target.into()),
    ]
}

/// Reply to an ssh prompt. Only a password prompt that names `target` gets
/// the secret, so a jump host never sees the destination's password.
pub fn answer<'a>(prompt: &str, target: &str, secret: &'a str) -> Option<&'a str> {
    let lower = prompt.to_lowercase();
    if lower.contains("yes/no") {
        Some("yes")
    } else if lower.contains("password") && names_target(prompt, target) {
        Some(secret)
    } else {
        None
    }
}

/// ssh prints the host lowercased, so only the user part is compared exactly.
fn names_target(prompt: &str, target: &str) -> bool {
    let Some((user, host)) = target.rsplit_once('@') else {
        return !target.is_empty() && prompt.contains(target);
    };
    if host.is_empty() {
        return false;
    }

    let host = host.to_lowercase();
    let needle = format!("{user}@");
    let name_char = |c: char| c.is_alphanumeric() || matches!(c, '.' | '-' | '_');
    prompt.match_indices(&needle).any(|(idx, _)| {
        if prompt[..idx].ends_with(name_char) {
            return false;
        }
        let rest = prompt[idx + needle.len()..].to_lowercase();
        rest.strip_prefix(host.as_str())
            .is_some_and(|tail| !tail.starts_with(name_char))
    })
}

/// If this process is running as the askpass helper, answer and return the
/// exit code to use.
pub fn answer_from_env() -> Option<i32> {
    let secret = std::env::var(SECRET_VAR).ok()?;
    let mut args = std::env::args_os().skip(1);
    let prompt = args.next()?.to_string_lossy().into_owned();
    if args.next().is_some() {
        return None;
    }
    let target = std::env::var(TARGET_VAR).unwrap_or_default();

    match answer(&prompt, &target, &secret) {
        Some(reply) => {
            let mut stdout = io::stdout();
            let written = writeln!(stdout, "{reply}").and_then(|_| stdout.flush());
            Some(if written.is_ok() { 0 } else { 1 })
        }
        None => Some(1),
    }
}
