use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::sync::Mutex;

mod api;
mod blockchain;
mod config;

use blockchain::{Ledger, LedgerConfig};
use config::ServerConfig;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::create_account,
        api::handlers::get_balances,
        api::handlers::get_account,
        api::handlers::submit_transfer,
        api::handlers::get_mempool,
        api::handlers::mine_block,
        api::handlers::get_chain,
        api::handlers::validate_chain,
        api::handlers::get_circulation,
        api::handlers::get_rewards,
        api::handlers::get_utxos,
        api::handlers::get_config
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::TransactionRecord,
            blockchain::TransferKind,
            blockchain::UnspentOutput,
            blockchain::AccountBalance,
            blockchain::CirculationPoint,
            blockchain::LedgerConfig,
            blockchain::Address,
            api::handlers::AccountResponse,
            api::handlers::TransferRequest,
            api::handlers::TransferResponse,
            api::handlers::MempoolResponse,
            api::handlers::MineRequest,
            api::handlers::MineResponse,
            api::handlers::ChainResponse,
            api::handlers::ValidationResponse
        )
    ),
    tags(
        (name = "ledger", description = "UTXO ledger API endpoints")
    ),
    info(
        title = "UTXO Ledger API",
        version = "1.0.0",
        description = "Accounts, signed transfers and proof-of-work mining over a UTXO set",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let ledger_config = LedgerConfig::from_env().context("loading ledger configuration")?;
    let server_config = ServerConfig::from_env().context("loading server configuration")?;
    info!(
        "Ledger configuration: fee {}, base reward {}, difficulty {}, genesis amount {}",
        ledger_config.fee,
        ledger_config.base_reward,
        ledger_config.difficulty,
        ledger_config.genesis_amount
    );

    // Mining the genesis block blocks until a valid nonce is found
    let ledger = Ledger::new(ledger_config).context("creating genesis block")?;
    if let Some(founder) = ledger.first_account() {
        info!(
            "Genesis account {} holds {}",
            founder.address(),
            ledger.balance_of(founder.id())?
        );
    }
    let ledger = web::Data::new(Mutex::new(ledger));

    info!(
        "Starting HTTP server at http://{}:{}",
        server_config.host, server_config.port
    );

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(ledger.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()),
            )
    })
    .bind((server_config.host.as_str(), server_config.port))?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_has_no_dangling_refs() {
        let doc = ApiDoc::openapi().to_json().unwrap();
        let schemas = ApiDoc::openapi()
            .components
            .map(|components| components.schemas)
            .unwrap_or_default();

        for (start, _) in doc.match_indices("#/components/schemas/") {
            let name: String = doc[start + "#/components/schemas/".len()..]
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            assert!(schemas.contains_key(&name), "missing schema {}", name);
        }
        assert!(!doc.contains("#/components/schemas/AccountId"));
    }
}
