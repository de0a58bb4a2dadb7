use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/accounts", web::post().to(handlers::create_account))
            .route("/accounts", web::get().to(handlers::get_balances))
            .route("/accounts/{id}", web::get().to(handlers::get_account))
            .route("/transfers", web::post().to(handlers::submit_transfer))
            .route("/mempool", web::get().to(handlers::get_mempool))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/circulation", web::get().to(handlers::get_circulation))
            .route("/rewards", web::get().to(handlers::get_rewards))
            .route("/utxos", web::get().to(handlers::get_utxos))
            .route("/config", web::get().to(handlers::get_config)),
    );
}
