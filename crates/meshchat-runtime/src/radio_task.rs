//! Radio task
//!
//! Owns a `Radio` and bridges it to the router: effects from the router are
//! executed against the radio, and radio notifications are translated into
//! router events. Every `SendPacket` effect is answered with exactly one
//! `SendCompleted` or `SendFailed` event carrying the same ticket.

use meshchat_core::{
    channel::{EffectReceiver, EventSender},
    Effect, Event, MeshChatError, Radio, RadioEvent, Result,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Task driving one radio
pub struct RadioTask<R: Radio> {
    radio: R,
    event_sender: EventSender,
    effect_receiver: EffectReceiver,
}

impl<R: Radio> RadioTask<R> {
    pub fn new(radio: R, event_sender: EventSender, effect_receiver: EffectReceiver) -> Self {
        Self {
            radio,
            event_sender,
            effect_receiver,
        }
    }

    /// Run until the router goes away or the radio shuts down
    pub async fn run(mut self) -> Result<()> {
        info!("Radio task starting");

        loop {
            tokio::select! {
                effect = self.effect_receiver.recv() => {
                    match effect {
                        Ok(effect) => {
                            if self.execute(effect).await.is_err() {
                                info!("Router event channel closed, shutting down");
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // Dropped sends are failed by the router's send timeout
                            warn!("Radio task lagged behind the router, {} effects dropped", skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("Effect channel closed, shutting down");
                            break;
                        }
                    }
                }
                radio_event = self.radio.next_event() => {
                    match radio_event {
                        Some(radio_event) => {
                            if self.forward(radio_event).await.is_err() {
                                info!("Router event channel closed, shutting down");
                                break;
                            }
                        }
                        None => {
                            info!("Radio closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.radio.stop_discovery().await {
            debug!("stop_discovery during shutdown failed: {}", e);
        }
        info!("Radio task stopped");
        Ok(())
    }

    async fn execute(&mut self, effect: Effect) -> Result<()> {
        match effect {
            Effect::SendPacket {
                handle,
                data,
                ticket,
            } => {
                let event = match self.radio.send(handle, data).await {
                    Ok(()) => Event::SendCompleted { ticket },
                    Err(e) => {
                        debug!(%handle, "send failed: {}", e);
                        Event::SendFailed {
                            ticket,
                            reason: e.to_string(),
                        }
                    }
                };
                self.emit(event).await
            }
            Effect::StartAdvertising => {
                let result = self.radio.advertise().await;
                self.report(result).await
            }
            Effect::StartScanning => {
                let result = self.radio.scan().await;
                self.report(result).await
            }
            Effect::StopDiscovery => {
                let result = self.radio.stop_discovery().await;
                self.report(result).await
            }
            Effect::Connect { identity } => match self.radio.connect(&identity).await {
                Ok(handle) => self.emit(Event::PeerAppeared { handle, identity }).await,
                Err(e) => self.report(Err(e)).await,
            },
            Effect::Disconnect { handle } => {
                // The radio reports the lost link itself
                let result = self.radio.disconnect(handle).await;
                self.report(result).await
            }
        }
    }

    async fn forward(&mut self, radio_event: RadioEvent) -> Result<()> {
        let event = match radio_event {
            RadioEvent::PeerAppeared { handle, identity } => Event::PeerAppeared { handle, identity },
            RadioEvent::Received { handle, bytes } => Event::PacketReceived {
                handle,
                data: bytes,
            },
            RadioEvent::PeerLost { handle } => Event::PeerLost { handle },
        };
        self.emit(event).await
    }

    async fn report(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Radio operation failed: {}", e);
                self.emit(Event::TransportError {
                    error: e.to_string(),
                })
                .await
            }
        }
    }

    async fn emit(&mut self, event: Event) -> Result<()> {
        self.event_sender
            .send(event)
            .await
            .map_err(|_| MeshChatError::channel_error("router event channel closed"))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
