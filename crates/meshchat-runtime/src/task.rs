//! Router task
//!
//! Runs the `Router` state machine inside its own tokio task. Commands from the
//! UI, events from the radio task and a periodic retry tick are multiplexed with
//! `tokio::select!`; the effects and app events the router produces are fanned
//! out to the radio task and the UI.

use std::collections::VecDeque;
use std::time::Duration;

use meshchat_core::{
    channel::{
        AppEventSender, ChannelError, CommandReceiver, EffectSender, EventReceiver,
        NonBlockingSend,
    },
    AppEvent, Command, Effect, Event, MeshChatError, Result, Router, RouterOutput, TimeSource,
};
use tokio::sync::broadcast::error::SendError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Task owning the router and its channel endpoints
pub struct RouterTask<T: TimeSource> {
    router: Router<T>,
    command_receiver: CommandReceiver,
    event_receiver: EventReceiver,
    effect_sender: EffectSender,
    app_event_sender: AppEventSender,
    sweep_interval: Duration,
    events_open: bool,
    running: bool,
}

impl<T: TimeSource> RouterTask<T> {
    pub fn new(
        router: Router<T>,
        command_receiver: CommandReceiver,
        event_receiver: EventReceiver,
        effect_sender: EffectSender,
        app_event_sender: AppEventSender,
    ) -> Self {
        let sweep_interval = router.config().retry.sweep_interval();
        Self {
            router,
            command_receiver,
            event_receiver,
            effect_sender,
            app_event_sender,
            sweep_interval,
            events_open: true,
            running: true,
        }
    }

    pub fn router(&self) -> &Router<T> {
        &self.router
    }

    /// Run until `Command::Shutdown`, until the command channel closes, or until
    /// an unrecoverable error.
    pub async fn run(mut self) -> Result<()> {
        info!(identity = %self.router.identity(), "Router task starting");

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        sweep.tick().await;

        while self.running {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(Command::Shutdown) => {
                            info!("Shutdown requested");
                            self.running = false;
                        }
                        Some(command) => {
                            debug!(?command, "command");
                            let result = self.router.handle_command(command);
                            let outcome = match result {
                                Ok(output) => self.publish(output),
                                Err(e) => self.command_failed(e),
                            };
                            if let Err(e) = outcome {
                                self.stop_on(e)?;
                            }
                        }
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }
                event = self.event_receiver.recv(), if self.events_open => {
                    match event {
                        Some(event) => {
                            let output = self.router.handle_event(event);
                            if let Err(e) = self.publish(output) {
                                self.stop_on(e)?;
                            }
                        }
                        None => {
                            info!("Event channel closed, radio task is gone");
                            self.events_open = false;
                        }
                    }
                }
                _ = sweep.tick() => {
                    let output = self.router.retry_due();
                    if let Err(e) = self.publish(output) {
                        self.stop_on(e)?;
                    }
                }
            }
        }

        let stats = self.router.stats();
        info!(
            sent = stats.messages_sent,
            received = stats.messages_received,
            routed = stats.messages_routed,
            "Router task stopped"
        );
        Ok(())
    }

    /// Report a rejected command to the UI, absorbing recoverable errors
    fn command_failed(&mut self, e: MeshChatError) -> Result<()> {
        if !e.is_recoverable() {
            return Err(e);
        }
        warn!("Command rejected: {}", e);
        self.deliver(AppEvent::SystemError {
            error: e.to_string(),
        })
    }

    /// Stop the loop on fatal errors, log and carry on otherwise
    fn stop_on(&mut self, e: MeshChatError) -> Result<()> {
        if e.is_recoverable() {
            warn!("Router task error: {}", e);
            Ok(())
        } else {
            error!("Unrecoverable error, shutting down router task: {}", e);
            self.running = false;
            Err(e)
        }
    }

    /// Fan out effects and app events. Packets no radio task could take are
    /// reported back to the router as failed sends.
    fn publish(&mut self, output: RouterOutput) -> Result<()> {
        let mut outputs = VecDeque::from([output]);

        while let Some(output) = outputs.pop_front() {
            let (effects, app_events) = output.into_parts();

            for effect in effects {
                if let Err(SendError(effect)) = self.effect_sender.send(effect) {
                    warn!(?effect, "No radio task is listening for effects");
                    if let Effect::SendPacket { ticket, .. } = effect {
                        outputs.push_back(self.router.handle_event(Event::SendFailed {
                            ticket,
                            reason: "no radio task".to_string(),
                        }));
                    }
                }
            }

            for app_event in app_events {
                self.deliver(app_event)?;
            }
        }
        Ok(())
    }

    fn deliver(&mut self, app_event: AppEvent) -> Result<()> {
        match self.app_event_sender.try_send_non_blocking(app_event) {
            Ok(()) => Ok(()),
            Err(ChannelError::ChannelFull) => {
                warn!("App event channel full, dropping event");
                Ok(())
            }
            Err(ChannelError::ChannelClosed) => {
                Err(MeshChatError::channel_error("app event channel closed"))
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use meshchat_core::{
        channel::{
            create_app_event_channel, create_command_channel, create_effect_channel,
            create_event_channel,
        },
        ChannelConfig, ConnectionHandle, ManualClock, MeshChatConfig, MessageId, MessageStatus,
        PeerIdentity, Timestamp,
    };
    use tokio::time::timeout;

    fn id(name: &str) -> PeerIdentity {
        PeerIdentity::new(name).unwrap()
    }

    fn router(name: &str) -> Router<ManualClock> {
        Router::new(
            id(name),
            MeshChatConfig::testing(),
            None,
            None,
            ManualClock::new(Timestamp::new(1_000)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn shutdown_command_stops_the_task() {
        let config = ChannelConfig::testing();
        let (command_tx, command_rx) = create_command_channel(&config);
        let (_event_tx, event_rx) = create_event_channel(&config);
        let (effect_tx, _effect_rx) = create_effect_channel(&config);
        let (app_tx, _app_rx) = create_app_event_channel(&config);

        let task = RouterTask::new(router("alice"), command_rx, event_rx, effect_tx, app_tx);
        let handle = tokio::spawn(task.run());

        command_tx.send(Command::Shutdown).await.unwrap();
        timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_command_is_reported_not_fatal() {
        let config = ChannelConfig::testing();
        let (command_tx, command_rx) = create_command_channel(&config);
        let (_event_tx, event_rx) = create_event_channel(&config);
        let (effect_tx, _effect_rx) = create_effect_channel(&config);
        let (app_tx, mut app_rx) = create_app_event_channel(&config);

        let task = RouterTask::new(router("alice"), command_rx, event_rx, effect_tx, app_tx);
        let handle = tokio::spawn(task.run());

        command_tx
            .send(Command::SendMessage {
                id: MessageId::new_random(),
                receiver: id("bob"),
                text: "   ".to_string(),
            })
            .await
            .unwrap();

        let event = timeout(Duration::from_secs(1), app_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, AppEvent::SystemError { .. }));

        command_tx.send(Command::GetSystemStatus).await.unwrap();
        let event = timeout(Duration::from_secs(1), app_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, AppEvent::SystemStatusReport { .. }));

        command_tx.send(Command::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn events_produce_effects() {
        let config = ChannelConfig::testing();
        let (command_tx, command_rx) = create_command_channel(&config);
        let (event_tx, event_rx) = create_event_channel(&config);
        let (effect_tx, mut effect_rx) = create_effect_channel(&config);
        let (app_tx, mut app_rx) = create_app_event_channel(&config);

        let task = RouterTask::new(router("alice"), command_rx, event_rx, effect_tx, app_tx);
        tokio::spawn(task.run());

        event_tx
            .send(Event::PeerAppeared {
                handle: ConnectionHandle::new(1),
                identity: id("bob"),
            })
            .await
            .unwrap();
        let event = timeout(Duration::from_secs(1), app_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, AppEvent::PeerConnected { .. }));

        command_tx
            .send(Command::SendMessage {
                id: MessageId::new_random(),
                receiver: id("bob"),
                text: "hi".to_string(),
            })
            .await
            .unwrap();
        let effect = timeout(Duration::from_secs(1), effect_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            effect,
            Effect::SendPacket { handle, .. } if handle == ConnectionHandle::new(1)
        ));
    }

    #[tokio::test]
    async fn unsent_packet_is_queued_for_retry() {
        let config = ChannelConfig::testing();
        let (command_tx, command_rx) = create_command_channel(&config);
        let (event_tx, event_rx) = create_event_channel(&config);
        let (effect_tx, effect_rx) = create_effect_channel(&config);
        let (app_tx, mut app_rx) = create_app_event_channel(&config);
        drop(effect_rx);

        let task = RouterTask::new(router("alice"), command_rx, event_rx, effect_tx, app_tx);
        tokio::spawn(task.run());

        event_tx
            .send(Event::PeerAppeared {
                handle: ConnectionHandle::new(1),
                identity: id("bob"),
            })
            .await
            .unwrap();

        let message_id = MessageId::new_random();
        command_tx
            .send(Command::SendMessage {
                id: message_id,
                receiver: id("bob"),
                text: "hi".to_string(),
            })
            .await
            .unwrap();

        let mut statuses = Vec::new();
        timeout(Duration::from_secs(1), async {
            while let Some(event) = app_rx.recv().await {
                if let AppEvent::StatusChanged { id, status, .. } = event {
                    assert_eq!(id, message_id);
                    statuses.push(status);
                    if status == MessageStatus::Stored {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(statuses, vec![MessageStatus::Sent, MessageStatus::Stored]);

        command_tx.send(Command::GetSystemStatus).await.unwrap();
        let status = timeout(Duration::from_secs(1), async {
            loop {
                if let Some(AppEvent::SystemStatusReport { status }) = app_rx.recv().await {
                    return status;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(status.pending_retries, 1);
        assert_eq!(status.in_flight_sends, 0);
    }
}
