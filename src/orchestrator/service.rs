//! Command service
//!
//! Runs the orchestrator behind a command queue so controllers in other
//! contexts can drive it with serialised [`Command`]s. Each command runs on
//! its own task; admission, not arrival order, decides what two concurrent
//! starts for one key do.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

use super::command::{parse_command, Command, CommandReply};
use super::engine::Orchestrator;

type Envelope = (Command, oneshot::Sender<CommandReply>);

/// Queue-driven front end for an [`Orchestrator`]
pub struct OrchestratorService {
    orchestrator: Arc<Orchestrator>,
    commands: mpsc::Receiver<Envelope>,
}

/// Handle for submitting commands to a running service
#[derive(Clone)]
pub struct CommandClient {
    commands: mpsc::Sender<Envelope>,
}

impl OrchestratorService {
    /// Create a service and its client
    pub fn new(orchestrator: Arc<Orchestrator>, capacity: usize) -> (Self, CommandClient) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let service = Self {
            orchestrator,
            commands: rx,
        };
        (service, CommandClient { commands: tx })
    }

    /// Serve commands until every client is dropped
    pub async fn run(mut self) {
        self.orchestrator.spawn_background();
        tracing::info!("Orchestrator service running");

        while let Some(envelope) = self.commands.recv().await {
            self.dispatch(envelope);
        }

        self.orchestrator.shutdown();
    }

    /// Serve commands until `shutdown` resolves or every client is dropped
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.orchestrator.spawn_background();
        tracing::info!("Orchestrator service running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                envelope = self.commands.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope),
                    None => break,
                },
            }
        }

        self.orchestrator.shutdown();
    }

    fn dispatch(&self, (command, reply_tx): Envelope) {
        let orchestrator = Arc::clone(&self.orchestrator);

        tokio::spawn(async move {
            let reply = orchestrator.handle(command).await;
            // Caller may have given up
            let _ = reply_tx.send(reply);
        });
    }
}

impl CommandClient {
    /// Submit a command and wait for its reply
    pub async fn call(&self, command: Command) -> Result<CommandReply> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send((command, tx))
            .await
            .map_err(|_| service_gone())?;
        rx.await.map_err(|_| service_gone())
    }

    /// Submit a JSON command and get the JSON reply
    pub async fn call_json(&self, command: serde_json::Value) -> Result<serde_json::Value> {
        let reply = self.call(parse_command(command)?).await?;
        Ok(serde_json::to_value(reply)?)
    }
}

fn service_gone() -> Error {
    Error::Collaborator("orchestrator service stopped".to_string())
}
