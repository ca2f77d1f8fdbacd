//! Built-in plugins for weft.
//!
//! - [`TimePlugin`] (`time`): reports the current UTC time
//! - [`ChatPlugin`] (`chat`): drafts a reply with the text-generation capability
//! - [`ReplyPlugin`] (`reply`): sends the latest result back to the platform

pub mod chat;
pub mod reply;
pub mod time;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use weft_core::plugin::Plugin;

pub use chat::ChatPlugin;
pub use reply::ReplyPlugin;
pub use time::TimePlugin;

/// Every built-in plugin with default settings.
pub fn builtin_plugins() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(TimePlugin::new()),
        Arc::new(ChatPlugin::new()),
        Arc::new(ReplyPlugin),
    ]
}
