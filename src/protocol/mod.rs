//! Wire protocol shared by the client core and the relay.
//!
//! JSON frames of shape `{type, ...fields}` over one persistent WebSocket.
//! Close code 1000 is an intentional closure; any other code is treated as
//! a transport failure by the client.

pub mod messages;

pub use messages::{
    ABNORMAL_CLOSURE, ChangeKind, ClientFrame, FrameError, InboundFrame, NORMAL_CLOSURE,
    ServerFrame, TextChange,
};
