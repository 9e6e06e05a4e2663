pub mod context;
pub mod strategies;

pub use context::{
    context_handler, request_cancellation, AuthRequest, AuthResolver, AuthStrategy, ReqContext,
    Resolution, RotationHook, StrategyOutcome, ORG_ID_HEADER,
};
pub use strategies::{
    AnonymousStrategy, ApiKeyStrategy, BasicAuthStrategy, ProxyStrategy, RenderKeyStrategy,
    SessionStrategy, RENDER_KEY_COOKIE,
};
