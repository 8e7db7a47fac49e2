use std::sync::Arc;

use alloy_primitives::Address;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::error;
use serde::{Deserialize, Serialize};

use super::{
    Eligibility, ItemView, ItemWithMerchant, MarketplaceReader, MerchantView, OrderView,
    PurchaseDetail, PurchaseSummary,
};
use crate::error::ChainError;

#[derive(thiserror::Error, Debug)]
pub enum FacadeError {
    #[error("{0}")]
    BadRequest(&'static str),

    #[error("{context}: {source}")]
    Chain {
        context: &'static str,
        source: ChainError,
    },
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for FacadeError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            FacadeError::BadRequest(message) => (StatusCode::BAD_REQUEST, *message),
            FacadeError::Chain { context, source } => {
                error!("{}: {}", context, source);
                (StatusCode::INTERNAL_SERVER_ERROR, *context)
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: message.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, FacadeError>;

#[derive(Deserialize)]
struct AddressQuery {
    address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EligibilityQuery {
    address: Option<String>,
    item_id: Option<String>,
}

pub fn router(reader: Arc<MarketplaceReader>) -> Router {
    Router::new()
        .route("/marketplace/item/:id", get(item))
        .route("/marketplace/purchase/:id", get(purchase))
        .route("/marketplace/purchases", get(purchases))
        .route("/marketplace/eligibility", get(eligibility))
        .route("/merchant/info", get(merchant_info))
        .route("/merchant/items", get(merchant_items))
        .route("/merchant/orders", get(merchant_orders))
        .with_state(reader)
}

fn chain_error(context: &'static str) -> impl FnOnce(ChainError) -> FacadeError {
    move |source| FacadeError::Chain { context, source }
}

/// Positive integer ids only.
fn parse_id(raw: &str, message: &'static str) -> Result<u64, FacadeError> {
    match raw.trim().parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(FacadeError::BadRequest(message)),
    }
}

fn parse_address(raw: Option<&str>, missing: &'static str) -> Result<Address, FacadeError> {
    let raw = raw
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or(FacadeError::BadRequest(missing))?;
    raw.parse()
        .map_err(|_| FacadeError::BadRequest("Invalid address"))
}

const ADDRESS_REQUIRED: &str = "Address parameter is required";

async fn item(
    State(reader): State<Arc<MarketplaceReader>>,
    Path(id): Path<String>,
) -> ApiResult<ItemWithMerchant> {
    let id = parse_id(&id, "Invalid item ID")?;
    reader
        .item(id)
        .await
        .map(Json)
        .map_err(chain_error("Failed to fetch item"))
}

async fn purchase(
    State(reader): State<Arc<MarketplaceReader>>,
    Path(id): Path<String>,
) -> ApiResult<PurchaseDetail> {
    let id = parse_id(&id, "Invalid purchase ID")?;
    reader
        .purchase(id)
        .await
        .map(Json)
        .map_err(chain_error("Failed to fetch purchase"))
}

async fn purchases(
    State(reader): State<Arc<MarketplaceReader>>,
    Query(query): Query<AddressQuery>,
) -> ApiResult<Vec<PurchaseSummary>> {
    let buyer = parse_address(query.address.as_deref(), ADDRESS_REQUIRED)?;
    reader
        .purchases_by_buyer(buyer)
        .await
        .map(Json)
        .map_err(chain_error("Failed to fetch purchases"))
}

async fn eligibility(
    State(reader): State<Arc<MarketplaceReader>>,
    Query(query): Query<EligibilityQuery>,
) -> ApiResult<Eligibility> {
    const REQUIRED: &str = "Address and itemId parameters are required";
    let account = parse_address(query.address.as_deref(), REQUIRED)?;
    let item_id = parse_id(query.item_id.as_deref().unwrap_or_default(), REQUIRED)?;
    reader
        .eligibility(account, item_id)
        .await
        .map(Json)
        .map_err(chain_error("Failed to check eligibility"))
}

async fn merchant_info(
    State(reader): State<Arc<MarketplaceReader>>,
    Query(query): Query<AddressQuery>,
) -> ApiResult<MerchantView> {
    let account = parse_address(query.address.as_deref(), ADDRESS_REQUIRED)?;
    reader
        .merchant_info(account)
        .await
        .map(Json)
        .map_err(chain_error("Failed to fetch merchant info"))
}

async fn merchant_items(
    State(reader): State<Arc<MarketplaceReader>>,
    Query(query): Query<AddressQuery>,
) -> ApiResult<Vec<ItemView>> {
    let account = parse_address(query.address.as_deref(), ADDRESS_REQUIRED)?;
    reader
        .merchant_items(account)
        .await
        .map(Json)
        .map_err(chain_error("Failed to fetch merchant items"))
}

async fn merchant_orders(
    State(reader): State<Arc<MarketplaceReader>>,
    Query(query): Query<AddressQuery>,
) -> ApiResult<Vec<OrderView>> {
    let account = parse_address(query.address.as_deref(), ADDRESS_REQUIRED)?;
    reader
        .merchant_orders(account)
        .await
        .map(Json)
        .map_err(chain_error("Failed to fetch merchant orders"))
}
