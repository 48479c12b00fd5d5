//! HTTP adapter - Pusher-compatible app API.
//!
//! - `GET  /apps/:app_id/channels`
//! - `GET  /apps/:app_id/channels/:channel_name`
//! - `GET  /apps/:app_id/channels/:channel_name/users`
//! - `POST /apps/:app_id/events`
//! - `POST /apps/:app_id/users/:user_id/terminate_connections`

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::ErrorResponse;
pub use routes::api_router;
