pub mod provision;

use axum::{
    Extension, Router,
    routing::{post, put},
};
use tower_http::trace::TraceLayer;

use crate::SharedState;

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/mail-domain", post(provision::add_mail_domain))
        .route("/api/mail-domain/cleanup", post(provision::cleanup_mail_domain))
        .route("/api/mail-server", post(provision::add_mail_server))
        .route("/api/mail-server/cleanup", post(provision::cleanup_mail_server))
        .route("/api/openpgp", put(provision::set_openpgp))
        .route("/api/plan", post(provision::plan))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
