pub mod engine;
pub mod error;
pub mod events;

pub use engine::RequestEngine;
pub use error::{EngineError, EngineResult};
pub use events::{
    ChannelObserver, EventObserver, FanOutObserver, JsonLinesObserver, ServerEvent,
    TracingObserver,
};
