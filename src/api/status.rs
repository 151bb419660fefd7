use axum::extract::State;
use axum::Json;

use super::types::StreamStatus;
use super::{ApiError, ApiState};
use crate::indexer::db::get_event_stream;
use crate::indexer::types::DbUuid;

/// `GET /api/v1/status`
pub(crate) async fn get_stream_status(
    State(state): State<ApiState>,
) -> Result<Json<StreamStatus>, ApiError> {
    let stream = get_event_stream(&state.pool, &DbUuid::from(state.stream_id)).await?;

    Ok(Json(StreamStatus {
        stream_id: state.stream_id,
        last_block_height: stream.map(|s| s.last_block_height.into()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::db::{insert_event_stream, test_utils::test_pool};
    use crate::indexer::types::DbBlockHeight;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_status_reports_cursor() {
        let state = ApiState {
            pool: test_pool().await,
            stream_id: Uuid::new_v4(),
        };

        let status = get_stream_status(State(state.clone())).await.unwrap().0;
        assert_eq!(status.last_block_height, None);

        insert_event_stream(&state.pool, &DbUuid::from(state.stream_id), DbBlockHeight::from(77))
            .await
            .unwrap();
        let status = get_stream_status(State(state)).await.unwrap().0;
        assert_eq!(status.last_block_height, Some(77));
    }
}
