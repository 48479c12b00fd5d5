//! HTTP handlers for the app API.
//!
//! Queries are cluster-wide. When the cluster does not answer in time the
//! request fails with 500 instead of returning partial data.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::BTreeMap;

use crate::adapters::facade::Adapter;
use crate::domain::{is_presence_channel, AppId, SocketId};
use crate::ports::{AdapterError, ConnectionAdapter};

use super::dto::{
    ChannelAttributes, ChannelResponse, ChannelsQuery, ChannelsResponse, ErrorResponse,
    PublishEventRequest, UserEntry, UsersResponse, MAX_EVENT_CHANNELS,
};

/// GET /apps/:app_id/channels - Occupied channels
pub async fn list_channels(
    State(adapter): State<Adapter>,
    Path(app_id): Path<String>,
    Query(query): Query<ChannelsQuery>,
) -> Response {
    let app_id = AppId::new(app_id);
    let prefix = query.filter_by_prefix.as_deref().unwrap_or("");

    if query.wants("user_count") && !prefix.starts_with("presence-") {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request(
                "user_count requires filter_by_prefix=presence-",
            )),
        )
            .into_response();
    }

    let counts = match adapter.get_channels_with_sockets_count(&app_id, false).await {
        Ok(counts) => counts,
        Err(e) => return adapter_error(e),
    };

    let mut channels = BTreeMap::new();
    for (channel, subscriptions) in counts {
        if !channel.starts_with(prefix) {
            continue;
        }
        let mut attributes = ChannelAttributes::default();
        if query.wants("subscription_count") {
            attributes.subscription_count = Some(subscriptions);
        }
        if query.wants("user_count") {
            match adapter
                .get_channel_members_count(&app_id, &channel, false)
                .await
            {
                Ok(users) => attributes.user_count = Some(users),
                Err(e) => return adapter_error(e),
            }
        }
        channels.insert(channel, attributes);
    }

    (StatusCode::OK, Json(ChannelsResponse { channels })).into_response()
}

/// GET /apps/:app_id/channels/:channel - Channel state
pub async fn get_channel(
    State(adapter): State<Adapter>,
    Path((app_id, channel)): Path<(String, String)>,
    Query(query): Query<ChannelsQuery>,
) -> Response {
    let app_id = AppId::new(app_id);

    let subscriptions = match adapter
        .get_channel_sockets_count(&app_id, &channel, false)
        .await
    {
        Ok(count) => count,
        Err(e) => return adapter_error(e),
    };

    let mut attributes = ChannelAttributes::default();
    if query.wants("subscription_count") {
        attributes.subscription_count = Some(subscriptions);
    }
    if query.wants("user_count") {
        if !is_presence_channel(&channel) {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::bad_request(
                    "user_count is only available for presence channels",
                )),
            )
                .into_response();
        }
        match adapter
            .get_channel_members_count(&app_id, &channel, false)
            .await
        {
            Ok(users) => attributes.user_count = Some(users),
            Err(e) => return adapter_error(e),
        }
    }

    let response = ChannelResponse {
        occupied: subscriptions > 0,
        attributes,
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// GET /apps/:app_id/channels/:channel/users - Presence members
pub async fn get_channel_users(
    State(adapter): State<Adapter>,
    Path((app_id, channel)): Path<(String, String)>,
) -> Response {
    if !is_presence_channel(&channel) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request(
                "Users are only available for presence channels",
            )),
        )
            .into_response();
    }

    let app_id = AppId::new(app_id);
    match adapter.get_channel_members(&app_id, &channel, false).await {
        Ok(members) => {
            let mut users: Vec<UserEntry> =
                members.into_keys().map(|id| UserEntry { id }).collect();
            users.sort_by(|a, b| a.id.cmp(&b.id));
            (StatusCode::OK, Json(UsersResponse { users })).into_response()
        }
        Err(e) => adapter_error(e),
    }
}

/// POST /apps/:app_id/events - Publish an event to channels
pub async fn publish_event(
    State(adapter): State<Adapter>,
    Path(app_id): Path<String>,
    Json(request): Json<PublishEventRequest>,
) -> Response {
    let targets = request.targets();
    if targets.is_empty() || targets.len() > MAX_EVENT_CHANNELS {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request(format!(
                "Events need between 1 and {} channels",
                MAX_EVENT_CHANNELS
            ))),
        )
            .into_response();
    }

    let app_id = AppId::new(app_id);
    let except = request.socket_id.as_deref().map(SocketId::new);
    let data = request.data_string();

    for channel in &targets {
        let message = json!({
            "event": request.name,
            "channel": channel,
            "data": data,
        });
        if let Err(e) = adapter
            .send(&app_id, channel, message, except.as_ref())
            .await
        {
            return adapter_error(e);
        }
    }

    (StatusCode::OK, Json(json!({}))).into_response()
}

/// POST /apps/:app_id/users/:user_id/terminate_connections
pub async fn terminate_user_connections(
    State(adapter): State<Adapter>,
    Path((app_id, user_id)): Path<(String, String)>,
) -> Response {
    let app_id = AppId::new(app_id);
    match adapter.terminate_user_connections(&app_id, &user_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({}))).into_response(),
        Err(e) => adapter_error(e),
    }
}

fn adapter_error(error: AdapterError) -> Response {
    tracing::warn!("Adapter call failed: {}", error);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::adapter(&error)),
    )
        .into_response()
}
