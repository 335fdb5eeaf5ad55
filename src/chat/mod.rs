//! 附近聊天核心：在线表、附近用户解析、消息扇出和定时清理

pub mod fanout;
pub mod presence;
pub mod protocol;
pub mod proximity;
pub mod retention;

pub use fanout::{FanoutRouter, RouteOutcome};
pub use presence::{ConnectionId, PresenceRegistry};
pub use protocol::{ClientEvent, NearbyPeer, ServerEvent};
pub use proximity::ProximityResolver;
pub use retention::{
    ChatState, Clock, OpenWindows, RetentionHandle, RetentionScheduler, SystemClock,
    TransitionKind,
};
