//! MeshChat Runtime
//!
//! Async engine around `meshchat-core`:
//! - `RouterTask`: owns the `Router` state machine and its retry timer
//! - `RadioTask`: executes effects against a `Radio` and feeds its events back
//! - `MeshChatRuntime` / `RuntimeHandle`: builder and UI-facing handle
//! - `SimulatedMesh`: in-process radio mesh for tests and the CLI

pub mod mesh_sim;
pub mod radio_task;
mod runtime;
pub mod task;

pub use mesh_sim::{SimulatedMesh, SimulatedRadio};
pub use radio_task::RadioTask;
pub use runtime::{MeshChatRuntime, RuntimeBuilder, RuntimeHandle};
pub use task::RouterTask;

// Re-export core types for convenience
pub use meshchat_core::{
    channel::{
        create_app_event_channel, create_command_channel, create_effect_channel,
        create_effect_receiver, create_event_channel, AppEventReceiver, AppEventSender,
        ChannelError, CommandReceiver, CommandSender, EffectReceiver, EffectSender,
        EventReceiver, EventSender, NonBlockingSend,
    },
    AppEvent, Command, Effect, Event, MeshChatConfig, MeshChatError, MeshChatResult, MessageId,
    MessageStatus, PeerIdentity,
};
