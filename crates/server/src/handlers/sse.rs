// Server-Sent Events stream of points updates

use std::{convert::Infallible, time::Duration};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};

use crate::{middleware::auth::AuthUser, services::events::PointsEvent, AppState};

// Logs the disconnect when the response stream is dropped.
struct StreamGuard {
    user_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        tracing::debug!(user_id = %self.user_id, "points stream closed");
    }
}

/// Students only see their own updates; staff see every grant.
fn is_visible(user: &AuthUser, event: &PointsEvent) -> bool {
    user.role.is_staff() || event.user_id == user.id
}

pub async fn points_stream(
    State(state): State<AppState>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.points.subscribe();
    tracing::debug!(
        user_id = %user.id,
        listeners = state.points.listener_count(),
        "points stream opened"
    );

    let guard = StreamGuard {
        user_id: user.id.clone(),
    };

    let stream = BroadcastStream::new(receiver).filter_map(move |item| {
        let _guard = &guard;
        match item {
            Ok(event) if is_visible(&user, &event) => Event::default()
                .event("points")
                .json_data(&event)
                .ok()
                .map(Ok::<_, Infallible>),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(user_id = %user.id, skipped, "points stream lagged");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
