//! Authorize handler

use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::info;

use super::{decode, encode, CallOutcome};
use crate::application::handlers::OcppHandlerV16;
use crate::application::sessions::TagVerdict;

pub(crate) fn id_tag_info(verdict: TagVerdict) -> IdTagInfo {
    let status = match verdict {
        TagVerdict::Accepted => AuthorizationStatus::Accepted,
        TagVerdict::Blocked => AuthorizationStatus::Blocked,
        TagVerdict::ConcurrentTx => AuthorizationStatus::ConcurrentTx,
        TagVerdict::Invalid => AuthorizationStatus::Invalid,
    };
    IdTagInfo {
        status,
        expiry_date: None,
        parent_id_tag: None,
    }
}

pub async fn handle_authorize(handler: &OcppHandlerV16, payload: &Value) -> CallOutcome {
    let req: AuthorizeRequest = decode(handler, "Authorize", payload)?;

    let verdict = handler
        .core
        .sessions()
        .authorize_tag(&handler.station_id, &req.id_tag)
        .await?;

    info!(
        station_id = %handler.station_id,
        id_tag = req.id_tag.as_str(),
        ?verdict,
        "Authorize"
    );

    encode(&AuthorizeResponse {
        id_tag_info: id_tag_info(verdict),
    })
}
