//! Runtime builder and handle
//!
//! `MeshChatRuntime::builder` wires a router task and a radio task together over
//! the CSP channels from `meshchat-core` and returns a `RuntimeHandle` the UI
//! uses to issue commands and read app events.

use meshchat_core::{
    channel::{
        create_app_event_channel, create_command_channel, create_effect_channel,
        create_event_channel, AppEventReceiver, CommandSender,
    },
    AppEvent, Command, ConversationEntry, MeshChatConfig, MeshChatError, MessageId, PeerIdentity,
    Radio, RecordStore, Result, Router, StoredMessage, SystemTimeSource, TimeSource,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::radio_task::RadioTask;
use crate::task::RouterTask;

/// Entry point for starting a node
pub struct MeshChatRuntime;

impl MeshChatRuntime {
    pub fn builder(identity: PeerIdentity) -> RuntimeBuilder<SystemTimeSource> {
        RuntimeBuilder::new(identity)
    }
}

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for a running node
pub struct RuntimeBuilder<T> {
    identity: PeerIdentity,
    config: MeshChatConfig,
    retry_store: Option<Box<dyn RecordStore<StoredMessage>>>,
    conversation_store: Option<Box<dyn RecordStore<ConversationEntry>>>,
    clock: T,
}

impl RuntimeBuilder<SystemTimeSource> {
    pub fn new(identity: PeerIdentity) -> Self {
        Self {
            identity,
            config: MeshChatConfig::default(),
            retry_store: None,
            conversation_store: None,
            clock: SystemTimeSource,
        }
    }
}

impl<T: TimeSource + Send + 'static> RuntimeBuilder<T> {
    /// Set the node configuration
    pub fn config(mut self, config: MeshChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist the retry store in `store` instead of memory
    pub fn retry_store(mut self, store: Box<dyn RecordStore<StoredMessage>>) -> Self {
        self.retry_store = Some(store);
        self
    }

    /// Persist conversation history in `store`; existing entries are restored
    pub fn conversation_store(mut self, store: Box<dyn RecordStore<ConversationEntry>>) -> Self {
        self.conversation_store = Some(store);
        self
    }

    /// Replace the clock used for expiry decisions
    pub fn clock<U: TimeSource + Send + 'static>(self, clock: U) -> RuntimeBuilder<U> {
        RuntimeBuilder {
            identity: self.identity,
            config: self.config,
            retry_store: self.retry_store,
            conversation_store: self.conversation_store,
            clock,
        }
    }

    /// Spawn the router and radio tasks. Must be called inside a tokio runtime.
    pub fn start<R: Radio + 'static>(self, radio: R) -> Result<RuntimeHandle> {
        let max_message_length = self.config.router.max_message_length;
        let channel_config = self.config.channels.clone();

        let router = Router::new(
            self.identity.clone(),
            self.config,
            self.retry_store,
            self.conversation_store,
            self.clock,
        )?;

        let (command_sender, command_receiver) = create_command_channel(&channel_config);
        let (event_sender, event_receiver) = create_event_channel(&channel_config);
        let (effect_sender, effect_receiver) = create_effect_channel(&channel_config);
        let (app_event_sender, app_event_receiver) = create_app_event_channel(&channel_config);

        let router_task = RouterTask::new(
            router,
            command_receiver,
            event_receiver,
            effect_sender,
            app_event_sender,
        );
        let radio_task = RadioTask::new(radio, event_sender, effect_receiver);

        let router_handle = tokio::spawn(router_task.run());
        let radio_handle = tokio::spawn(radio_task.run());

        info!(identity = %self.identity, "MeshChat node started");

        Ok(RuntimeHandle {
            identity: self.identity,
            max_message_length,
            command_sender,
            app_event_receiver,
            router_handle: Some(router_handle),
            radio_handle: Some(radio_handle),
        })
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle to a running node
pub struct RuntimeHandle {
    identity: PeerIdentity,
    max_message_length: usize,
    command_sender: CommandSender,
    app_event_receiver: AppEventReceiver,
    router_handle: Option<JoinHandle<Result<()>>>,
    radio_handle: Option<JoinHandle<Result<()>>>,
}

impl RuntimeHandle {
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Queue a message for `receiver` and return its id.
    ///
    /// Text problems are reported here; the delivery outcome arrives later as
    /// `AppEvent::StatusChanged`.
    pub async fn send_message<S: Into<String>>(
        &self,
        receiver: PeerIdentity,
        text: S,
    ) -> Result<MessageId> {
        let text = text.into();
        Router::<SystemTimeSource>::check_text(&text, self.max_message_length)?;
        if receiver == self.identity {
            return Err(MeshChatError::InvalidIdentity {
                reason: "cannot send a message to yourself".to_string(),
            });
        }

        let id = MessageId::new_random();
        self.send_command(Command::SendMessage { id, receiver, text })
            .await?;
        Ok(id)
    }

    /// Ask for the history with `peer`; answered by `AppEvent::ConversationSnapshot`
    pub async fn request_conversation(&self, peer: PeerIdentity) -> Result<()> {
        self.send_command(Command::GetConversation { peer }).await
    }

    pub async fn start_discovery(&self) -> Result<()> {
        self.send_command(Command::StartDiscovery).await
    }

    pub async fn stop_discovery(&self) -> Result<()> {
        self.send_command(Command::StopDiscovery).await
    }

    pub async fn connect(&self, identity: PeerIdentity) -> Result<()> {
        self.send_command(Command::ConnectToPeer { identity }).await
    }

    pub async fn disconnect(&self, identity: PeerIdentity) -> Result<()> {
        self.send_command(Command::DisconnectFromPeer { identity })
            .await
    }

    /// Run a retry sweep now instead of waiting for the next tick
    pub async fn retry_now(&self) -> Result<()> {
        self.send_command(Command::RetryNow).await
    }

    /// Ask for a status report; answered by `AppEvent::SystemStatusReport`
    pub async fn request_status(&self) -> Result<()> {
        self.send_command(Command::GetSystemStatus).await
    }

    /// Next app event, or `None` once the router task has stopped
    pub async fn next_app_event(&mut self) -> Option<AppEvent> {
        self.app_event_receiver.recv().await
    }

    /// App event if one is already waiting
    pub fn try_next_app_event(&mut self) -> Option<AppEvent> {
        self.app_event_receiver.try_recv().ok()
    }

    /// Stop both tasks and wait for them to finish
    pub async fn shutdown(mut self) -> Result<()> {
        info!(identity = %self.identity, "Shutting down MeshChat node");
        if self.command_sender.send(Command::Shutdown).await.is_err() {
            warn!("Router task already stopped");
        }

        let mut outcome = Ok(());
        for handle in [self.router_handle.take(), self.radio_handle.take()]
            .into_iter()
            .flatten()
        {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Task ended with error: {}", e);
                    outcome = Err(e);
                }
                Err(e) => {
                    outcome = Err(MeshChatError::channel_error(format!(
                        "task join failed: {}",
                        e
                    )))
                }
            }
        }
        outcome
    }

    async fn send_command(&self, command: Command) -> Result<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| MeshChatError::channel_error("router task is not running"))
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        for handle in [self.router_handle.take(), self.radio_handle.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("identity", &self.identity)
            .field("running", &self.router_handle.is_some())
            .finish()
    }
}
