mod chat_completion;
mod health;
mod models;

pub use chat_completion::chat_completion_router;
pub use health::health_router;
pub use models::models_router;
