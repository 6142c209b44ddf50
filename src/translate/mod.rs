//! Wire types for the two client dialects, and the pure translations between
//! them and the canonical chat-completion shapes.

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
