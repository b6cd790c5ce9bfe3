mod auth;
mod conversations;
mod edit;
mod generate;
mod health;
mod index;
mod metrics;

pub use auth::{login_handler, logout_handler, me_handler, signup_handler};
pub use conversations::{
    create_conversation_handler, delete_conversation_handler, list_conversations_handler,
    list_messages_handler, update_conversation_handler,
};
pub use edit::{compose_handler, edit_handler};
pub use generate::generate_handler;
pub use health::health_handler;
pub use index::index_handler;
pub use metrics::metrics_handler;
