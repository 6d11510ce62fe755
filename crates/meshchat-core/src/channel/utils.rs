//! Channel utilities for CSP communication
//!
//! Bounded tokio `mpsc` channels for commands, events and app events, and a
//! `broadcast` channel for effects so more than one radio task can subscribe.

use tokio::sync::{broadcast, mpsc};

use crate::channel::communication::{AppEvent, Command, Effect, Event};
use crate::config::ChannelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel buffer is full")]
    ChannelFull,
    #[error("Channel is closed")]
    ChannelClosed,
}

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;
pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;
pub type EffectSender = broadcast::Sender<Effect>;
pub type EffectReceiver = broadcast::Receiver<Effect>;
pub type AppEventSender = mpsc::Sender<AppEvent>;
pub type AppEventReceiver = mpsc::Receiver<AppEvent>;

// ----------------------------------------------------------------------------
// Channel Creation Utilities
// ----------------------------------------------------------------------------

/// Create bounded command channel (UI → Router)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

/// Create bounded event channel (Radio → Router)
pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    mpsc::channel(config.event_buffer_size)
}

/// Create broadcast effect channel (Router → Radio tasks).
///
/// Radio tasks should get their own receiver through `create_effect_receiver`.
pub fn create_effect_channel(config: &ChannelConfig) -> (EffectSender, EffectReceiver) {
    broadcast::channel(config.effect_buffer_size)
}

pub fn create_effect_receiver(effect_sender: &EffectSender) -> EffectReceiver {
    effect_sender.subscribe()
}

/// Create bounded app event channel (Router → UI)
pub fn create_app_event_channel(config: &ChannelConfig) -> (AppEventSender, AppEventReceiver) {
    mpsc::channel(config.app_event_buffer_size)
}

// ----------------------------------------------------------------------------
// Non-blocking Send Utilities
// ----------------------------------------------------------------------------

/// Send without waiting for buffer space
pub trait NonBlockingSend<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError>;
}

impl<T> NonBlockingSend<T> for mpsc::Sender<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError> {
        self.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::ChannelClosed,
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_channel_creation() {
        let config = ChannelConfig::default();
        let (sender, mut receiver) = create_command_channel(&config);

        sender.send(Command::StartDiscovery).await.unwrap();
        assert_eq!(receiver.recv().await, Some(Command::StartDiscovery));
    }

    #[tokio::test]
    async fn test_effect_broadcast_reaches_every_subscriber() {
        let config = ChannelConfig::default();
        let (sender, _keepalive) = create_effect_channel(&config);
        let mut first = create_effect_receiver(&sender);
        let mut second = create_effect_receiver(&sender);

        sender.send(Effect::StartScanning).unwrap();
        assert_eq!(first.recv().await.unwrap(), Effect::StartScanning);
        assert_eq!(second.recv().await.unwrap(), Effect::StartScanning);
    }

    #[test]
    fn test_non_blocking_send_reports_full_and_closed() {
        let config = ChannelConfig {
            command_buffer_size: 1,
            ..ChannelConfig::default()
        };
        let (sender, receiver) = create_command_channel(&config);

        sender.try_send_non_blocking(Command::RetryNow).unwrap();
        assert_eq!(
            sender.try_send_non_blocking(Command::RetryNow),
            Err(ChannelError::ChannelFull)
        );

        drop(receiver);
        assert_eq!(
            sender.try_send_non_blocking(Command::RetryNow),
            Err(ChannelError::ChannelClosed)
        );
    }
}
