//! Channel Module
//!
//! CSP channel infrastructure between the UI, the router task and the radio task:
//! - `communication`: commands, events, effects and app events
//! - `utils`: channel aliases and constructors

pub mod communication;
pub mod utils;

pub use communication::{AppEvent, Command, Effect, Event};

pub use crate::config::ChannelConfig;

pub use utils::{
    create_app_event_channel, create_command_channel, create_effect_channel,
    create_effect_receiver, create_event_channel, AppEventReceiver, AppEventSender,
    ChannelError, CommandReceiver, CommandSender, EffectReceiver, EffectSender, EventReceiver,
    EventSender, NonBlockingSend,
};
