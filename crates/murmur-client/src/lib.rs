pub mod client;
pub mod handlers;

pub use client::VoiceChatClient;
pub use handlers::ResponseRouter;
