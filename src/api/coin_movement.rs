use axum::extract::{Query, State};
use axum::Json;

use super::types::{CoinMovementEntry, CoinMovementList, CoinMovementQuery};
use super::{ApiError, ApiState};
use crate::indexer::db::list_coin_movements;

/// `GET /api/v1/coin-movement`
pub(crate) async fn get_coin_movements(
    State(state): State<ApiState>,
    Query(query): Query<CoinMovementQuery>,
) -> Result<Json<CoinMovementList>, ApiError> {
    let views = list_coin_movements(
        &state.pool,
        query.from,
        query.to,
        query.offset(),
        query.limit(),
    )
    .await?;

    Ok(Json(CoinMovementList {
        transactions: views.into_iter().map(CoinMovementEntry::from).collect(),
    }))
}
