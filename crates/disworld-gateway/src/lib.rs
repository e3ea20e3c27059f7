pub mod platform;
pub mod rest;
pub mod session;

pub use platform::{ChatPlatform, PlatformError};
pub use rest::DiscordClient;
