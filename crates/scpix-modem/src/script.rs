//! Sequential AT scripts.
//!
//! A script is an ordered list of [`CommandSpec`]s. Commands run one after
//! another with a fixed pause between them, and the first failure aborts
//! the rest.

use std::time::Duration;

use scpix_core::command::CommandSpec;
use scpix_core::error::{Error, Result};
use tracing::{error, info};

use crate::passthrough;
use crate::session::Session;

/// Pause between consecutive script commands.
pub const INTER_COMMAND_DELAY: Duration = Duration::from_millis(200);

/// Run `specs` in order.
///
/// The whole script runs inside one pass-through environment, unless the
/// caller is already `inside_passthrough`.
pub async fn run_script(
    session: &mut Session,
    specs: &[CommandSpec],
    inside_passthrough: bool,
) -> Result<()> {
    if inside_passthrough {
        execute(session, specs).await
    } else {
        passthrough::run(session, async |s| execute(s, specs).await).await
    }
}

async fn execute(session: &mut Session, specs: &[CommandSpec]) -> Result<()> {
    for (index, spec) in specs.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(INTER_COMMAND_DELAY).await;
        }
        if let Err(e) = session.at(spec).await {
            error!(command = %spec.command, error = %e, "script aborted at line {}", index + 1);
            return Err(e);
        }
    }
    info!(commands = specs.len(), "script complete");
    Ok(())
}

/// Parse a script file: one `command[;timeout_ms[;expect]]` per line.
///
/// Blank lines are skipped. Commands without a timeout get
/// `default_timeout`.
pub fn parse_script(text: &str, default_timeout: Duration) -> Result<Vec<CommandSpec>> {
    let mut specs = Vec::new();
    for (number, line) in text.lines().enumerate() {
        match CommandSpec::parse_script_line(line, default_timeout) {
            Ok(Some(spec)) => specs.push(spec),
            Ok(None) => {}
            Err(e) => {
                return Err(Error::InvalidParameter(format!("line {}: {e}", number + 1)));
            }
        }
    }
    Ok(specs)
}

/// Specs for plain command strings that expect nothing.
///
/// Each command completes when the modem goes quiet for `timeout`.
pub fn quiet_specs<'a, I>(commands: I, timeout: Duration) -> Vec<CommandSpec>
where
    I: IntoIterator<Item = &'a str>,
{
    commands
        .into_iter()
        .map(|command| CommandSpec::new(command, timeout))
        .collect()
}
