//! The pass-through environment.
//!
//! AT traffic only reaches the modem while the bridge forwards the serial
//! link. [`run`] switches forwarding on, waits for the bridge to settle,
//! runs the body, and always switches forwarding off again, whether the
//! body succeeded or not.

use std::time::Duration;

use scpix_core::command::find;
use scpix_core::error::{Error, Result};
use tracing::{debug, warn};

use crate::session::Session;

/// Time the bridge needs after switching forwarding on or off.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Run `body` with the bridge in pass-through mode.
///
/// The body's own error takes precedence over a failure to leave
/// pass-through; the latter is only logged in that case.
///
/// ```no_run
/// # use scpix_core::command::CommandSpec;
/// # use scpix_modem::{passthrough, Session};
/// # async fn demo(session: &mut Session) -> scpix_core::Result<()> {
/// let reply = passthrough::run(session, async |s| {
///     let spec = CommandSpec::new("ati", s.timing().at_response);
///     s.at(&spec).await
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn run<T, F>(session: &mut Session, body: F) -> Result<T>
where
    F: AsyncFnOnce(&mut Session) -> Result<T>,
{
    enter(session).await?;

    let result = body(session).await;
    let exited = leave(session).await;

    match (result, exited) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(exit_err)) => {
            warn!(error = %exit_err, "leaving pass-through failed");
            Err(e)
        }
    }
}

async fn enter(session: &mut Session) -> Result<()> {
    let command = session.commands().passthrough_on.clone();
    let channel = session.channel_mut();
    channel.send_line(&command).await?;

    let settled = channel.drain_for(SETTLE_DELAY).await?;
    if find(&settled, b"ERROR").is_some() {
        return Err(Error::Device(format!(
            "{command}: {}",
            String::from_utf8_lossy(&settled).trim()
        )));
    }
    debug!("pass-through on");
    Ok(())
}

async fn leave(session: &mut Session) -> Result<()> {
    let command = session.commands().passthrough_off.clone();
    let channel = session.channel_mut();
    channel.send_line(&command).await?;
    channel.drain_for(SETTLE_DELAY).await?;
    debug!("pass-through off");
    Ok(())
}
