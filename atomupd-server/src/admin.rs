use crate::state::{AdminCommand, ServerState};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::{mpsc, oneshot},
};
use tracing::{debug, info};

/// A request for a background job, optionally waiting to learn whether it
/// was started.
#[derive(Debug)]
pub struct AdminRequest {
    pub command: AdminCommand,
    pub reply: Option<oneshot::Sender<bool>>,
}

/// Turn `SIGUSR1` into dump requests and `SIGUSR2` into reload requests.
pub fn listen_for_signals(requests: mpsc::Sender<AdminRequest>) -> std::io::Result<()> {
    let mut dump = signal(SignalKind::user_defined1())?;
    let mut reload = signal(SignalKind::user_defined2())?;

    tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                Some(()) = dump.recv() => AdminCommand::Dump,
                Some(()) = reload.recv() => AdminCommand::Reload,
                else => break,
            };
            debug!(?command, "Received signal");

            let request = AdminRequest {
                command,
                reply: None,
            };
            if requests.send(request).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

/// Serve admin requests one at a time until every sender is gone.
pub async fn run(state: ServerState, mut requests: mpsc::Receiver<AdminRequest>) {
    while let Some(request) = requests.recv().await {
        let started = state.trigger(request.command).is_some();
        if started {
            info!(command = ?request.command, "Started background job");
        }
        if let Some(reply) = request.reply {
            let _ = reply.send(started);
        }
    }
}
