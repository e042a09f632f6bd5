//! Order endpoints
//!
//! Lookups go through the cache-first read path. `/random/{amount}` is the
//! producer: it publishes synthetic orders and returns the exact payload it
//! handed to the channel.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use shared::models::Order;
use shared::{AppError, AppResult, ErrorCode};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/orders", get(list))
        .route("/orders/{order_uid}", get(get_by_id))
        .route("/random/{amount}", get(random).post(random))
}

/// All complete orders
pub async fn list(State(state): State<ServerState>) -> AppResult<Json<Vec<Order>>> {
    let orders = state.orders.list_orders().await?;
    Ok(Json(orders))
}

pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(order_uid): Path<String>,
) -> AppResult<Json<Order>> {
    let order = state.orders.get_order(&order_uid).await?;
    Ok(Json(order))
}

fn parse_amount(raw: &str, max: usize) -> AppResult<usize> {
    let amount: usize = raw.trim().parse().map_err(|_| {
        AppError::with_message(ErrorCode::InvalidFormat, format!("'{raw}' is not a positive integer"))
    })?;
    if amount == 0 || amount > max {
        return Err(AppError::with_message(
            ErrorCode::ValueOutOfRange,
            format!("amount must be between 1 and {max}"),
        )
        .with_detail("max", max));
    }
    Ok(amount)
}

/// Generate and publish `amount` orders as one message
pub async fn random(
    State(state): State<ServerState>,
    Path(amount): Path<String>,
) -> AppResult<Response> {
    let amount = parse_amount(&amount, state.orders.max_batch_size())?;
    let published = state.orders.generate_and_publish(amount).await?;
    tracing::debug!(message_id = %published.message_id, count = published.count, "Random orders published");
    Ok(([(header::CONTENT_TYPE, "application/json")], published.payload).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("3", 10).unwrap(), 3);
        assert_eq!(parse_amount("10", 10).unwrap(), 10);
        assert_eq!(parse_amount("abc", 10).unwrap_err().code, ErrorCode::InvalidFormat);
        assert_eq!(parse_amount("-1", 10).unwrap_err().code, ErrorCode::InvalidFormat);
        assert_eq!(parse_amount("0", 10).unwrap_err().code, ErrorCode::ValueOutOfRange);
        assert_eq!(parse_amount("11", 10).unwrap_err().code, ErrorCode::ValueOutOfRange);
    }
}
