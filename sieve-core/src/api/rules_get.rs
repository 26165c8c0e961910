use actix_web::{get, web, HttpResponse, Responder};

use super::ApiState;

/// Serve a snapshot of the active rule tree
///
/// This endpoint returns the full rule tree as JSON, with each rule's raw
/// filter and aggregation strings, its action specs, its live counters and
/// the current aggregation buckets.
#[get("/rules")]
pub async fn rules(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.store.snapshot())
}
