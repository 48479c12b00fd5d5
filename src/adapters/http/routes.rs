//! HTTP routes for the app API.

use axum::{
    routing::{get, post},
    Router,
};

use crate::adapters::facade::Adapter;

use super::handlers::{
    get_channel, get_channel_users, list_channels, publish_event, terminate_user_connections,
};

/// Creates the app API router. State is supplied by the caller.
pub fn api_router() -> Router<Adapter> {
    Router::new()
        .route("/apps/:app_id/channels", get(list_channels))
        .route("/apps/:app_id/channels/:channel_name", get(get_channel))
        .route(
            "/apps/:app_id/channels/:channel_name/users",
            get(get_channel_users),
        )
        .route("/apps/:app_id/events", post(publish_event))
        .route(
            "/apps/:app_id/users/:user_id/terminate_connections",
            post(terminate_user_connections),
        )
}
