use std::path::Path;

use actix_web::{route, web, HttpResponse, Responder};

use super::ApiState;

/// Reload the rule file
///
/// Re-parses the configured rule file and atomically swaps the active tree.
/// A parse error leaves the running tree untouched and is reported in the
/// response body.
#[route("/reload_rules", method = "GET", method = "POST")]
pub async fn reload_rules(state: web::Data<ApiState>) -> impl Responder {
    match state.store.reload(Path::new(&state.rule_file)) {
        Ok(total) => {
            log::info!("Rule file reloaded, {} rules active", total);
            HttpResponse::Ok().body("ok")
        }
        Err(err) => {
            log::error!("Cannot reload rules from {}: {}", state.rule_file, err);
            HttpResponse::InternalServerError().body(err.to_string())
        }
    }
}
