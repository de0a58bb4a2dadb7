use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::sync::Mutex;

use crate::blockchain::{
    AccountBalance, AccountId, Amount, Block, CirculationPoint, Ledger, LedgerConfig, LedgerError,
    TransactionRecord, UnspentOutput,
};

/// Shared ledger state; the mutex serializes transfers and mining
pub type LedgerData = web::Data<Mutex<Ledger>>;

/// Runs `task` against the locked ledger on the blocking pool.
///
/// Mining holds the lock for a whole proof-of-work search, so waiting for it
/// happens off the actix workers.
async fn with_ledger<T, F>(ledger: &LedgerData, task: F) -> Result<T, HttpResponse>
where
    T: Send + 'static,
    F: FnOnce(&mut Ledger) -> Result<T, LedgerError> + Send + 'static,
{
    let ledger = ledger.clone();
    let outcome = web::block(move || {
        let mut guard = ledger.lock().ok()?;
        Some(task(&mut guard))
    })
    .await;

    match outcome {
        Ok(Some(Ok(value))) => Ok(value),
        Ok(Some(Err(err))) => Err(error_response(&err)),
        Ok(None) => {
            error!("Ledger lock poisoned");
            Err(internal_error())
        }
        Err(err) => {
            error!("Ledger task failed: {}", err);
            Err(internal_error())
        }
    }
}

fn internal_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": "Ledger unavailable"
    }))
}

/// Maps a ledger error to a status code: rejections are 422, missing
/// preconditions 404/409
fn error_response(err: &LedgerError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        LedgerError::Rejected(_) => HttpResponse::UnprocessableEntity().json(body),
        LedgerError::UnknownAccount(_) => HttpResponse::NotFound().json(body),
        LedgerError::EmptyMempool | LedgerError::EmptyChain => HttpResponse::Conflict().json(body),
        LedgerError::InvalidChain(_) | LedgerError::Config(_) | LedgerError::Overflow(_) => {
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Response for the account endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    /// The account id
    #[schema(value_type = u64)]
    pub id: AccountId,

    /// The account's address
    pub address: String,

    /// The account's public key (hex encoded)
    pub public_key: String,

    /// Balance in the live UTXO set
    #[schema(value_type = String, example = "50.00000000")]
    pub balance: Amount,
}

/// Create a new account
///
/// Generates a keypair held by the ledger
#[utoipa::path(
    post,
    path = "/api/v1/accounts",
    responses(
        (status = 201, description = "Account created successfully", body = AccountResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_account(ledger: LedgerData) -> impl Responder {
    let created = with_ledger(&ledger, |ledger| {
        let account = ledger.create_account();
        Ok(AccountResponse {
            id: account.id(),
            address: account.address().0.clone(),
            public_key: account.public_key_hex(),
            balance: Amount::ZERO,
        })
    })
    .await;

    match created {
        Ok(response) => HttpResponse::Created().json(response),
        Err(response) => response,
    }
}

/// Get all balances
///
/// Returns every account with its balance
#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    responses(
        (status = 200, description = "Balances retrieved successfully", body = Vec<AccountBalance>)
    )
)]
pub async fn get_balances(ledger: LedgerData) -> impl Responder {
    let balances = with_ledger(&ledger, |ledger| {
        Ok(ledger.balances()?.into_values().collect::<Vec<AccountBalance>>())
    })
    .await;

    match balances {
        Ok(balances) => HttpResponse::Ok().json(balances),
        Err(response) => response,
    }
}

/// Get an account
#[utoipa::path(
    get,
    path = "/api/v1/accounts/{id}",
    params(
        ("id" = u64, Path, description = "Account id")
    ),
    responses(
        (status = 200, description = "Account retrieved successfully", body = AccountResponse),
        (status = 404, description = "Unknown account")
    )
)]
pub async fn get_account(ledger: LedgerData, id: web::Path<AccountId>) -> impl Responder {
    let id = id.into_inner();
    let account = with_ledger(&ledger, move |ledger| {
        let balance = ledger.balance_of(id)?;
        let account = ledger.account(id).ok_or(LedgerError::UnknownAccount(id))?;
        Ok(AccountResponse {
            id,
            address: account.address().0.clone(),
            public_key: account.public_key_hex(),
            balance,
        })
    })
    .await;

    match account {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// Request for the transfer endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    /// The sending account
    #[schema(value_type = u64)]
    pub sender: AccountId,

    /// The receiving account
    #[schema(value_type = u64)]
    pub receiver: AccountId,

    /// The amount to transfer, fee excluded
    #[schema(value_type = String, example = "50")]
    pub amount: Amount,
}

/// Response for the transfer endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransferResponse {
    /// The message
    pub message: String,

    /// The applied transfer as stored in the mempool
    pub transaction: TransactionRecord,

    /// Transfers waiting for the next block
    pub mempool_size: usize,
}

/// Submit a transfer
///
/// Signs and applies a transfer, then queues it for the next block
#[utoipa::path(
    post,
    path = "/api/v1/transfers",
    request_body = TransferRequest,
    responses(
        (status = 201, description = "Transfer applied", body = TransferResponse),
        (status = 404, description = "Unknown account"),
        (status = 422, description = "Transfer rejected")
    )
)]
pub async fn submit_transfer(
    ledger: LedgerData,
    request: web::Json<TransferRequest>,
) -> impl Responder {
    let request = request.into_inner();
    let submitted = with_ledger(&ledger, move |ledger| {
        let transaction =
            ledger.submit_transfer(request.sender, request.receiver, request.amount)?;
        Ok(TransferResponse {
            message: "Transfer will be added to the next block".to_string(),
            transaction,
            mempool_size: ledger.mempool_len(),
        })
    })
    .await;

    match submitted {
        Ok(response) => HttpResponse::Created().json(response),
        Err(response) => response,
    }
}

/// Response for the mempool endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MempoolResponse {
    pub size: usize,
    pub transactions: Vec<TransactionRecord>,
}

/// Get the mempool
///
/// Returns the transfers waiting to be mined
#[utoipa::path(
    get,
    path = "/api/v1/mempool",
    responses(
        (status = 200, description = "Mempool retrieved successfully", body = MempoolResponse)
    )
)]
pub async fn get_mempool(ledger: LedgerData) -> impl Responder {
    let mempool = with_ledger(&ledger, |ledger| {
        Ok(MempoolResponse {
            size: ledger.mempool_len(),
            transactions: ledger.mempool().to_vec(),
        })
    })
    .await;

    match mempool {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The account receiving the reward
    #[schema(value_type = u64)]
    pub miner: AccountId,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Mine a new block
///
/// Runs the proof-of-work search while holding the ledger, so no transfer
/// can slip in mid-block
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 404, description = "Unknown miner account"),
        (status = 409, description = "Nothing to mine"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(ledger: LedgerData, request: web::Json<MineRequest>) -> impl Responder {
    let miner = request.miner;
    let mined = with_ledger(&ledger, move |ledger| ledger.mine(miner)).await;

    match mined {
        Ok(block) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Err(response) => response,
    }
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let chain = with_ledger(&ledger, |ledger| {
        Ok(ChainResponse {
            length: ledger.chain().len(),
            chain: ledger.chain().to_vec(),
            is_valid: ledger.is_valid(),
        })
    })
    .await;

    match chain {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub is_valid: bool,

    /// Why the chain is invalid, if it is
    pub reason: Option<String>,
}

/// Check if the blockchain is valid
///
/// Validates hashes, proof of work and linkage of every block
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    let validation = with_ledger(&ledger, |ledger| {
        let reason = ledger.validate_chain().err().map(|err| err.to_string());
        Ok(ValidationResponse {
            is_valid: reason.is_none(),
            reason,
        })
    })
    .await;

    match validation {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(response) => response,
    }
}

/// Get the money in circulation
///
/// Returns the total value of live outputs after each block
#[utoipa::path(
    get,
    path = "/api/v1/circulation",
    responses(
        (status = 200, description = "Circulation history retrieved successfully", body = Vec<CirculationPoint>)
    )
)]
pub async fn get_circulation(ledger: LedgerData) -> impl Responder {
    let circulation = with_ledger(&ledger, |ledger| Ok(ledger.circulation().to_vec())).await;

    match circulation {
        Ok(points) => HttpResponse::Ok().json(points),
        Err(response) => response,
    }
}

/// Get the mining rewards
///
/// Returns every coinbase transfer paid to a miner
#[utoipa::path(
    get,
    path = "/api/v1/rewards",
    responses(
        (status = 200, description = "Rewards retrieved successfully", body = Vec<TransactionRecord>)
    )
)]
pub async fn get_rewards(ledger: LedgerData) -> impl Responder {
    let rewards = with_ledger(&ledger, |ledger| {
        Ok(ledger
            .rewards()
            .iter()
            .map(|reward| reward.to_record())
            .collect::<Vec<TransactionRecord>>())
    })
    .await;

    match rewards {
        Ok(rewards) => HttpResponse::Ok().json(rewards),
        Err(response) => response,
    }
}

/// Get the UTXO set
///
/// Returns every live unspent output
#[utoipa::path(
    get,
    path = "/api/v1/utxos",
    responses(
        (status = 200, description = "UTXO set retrieved successfully", body = Vec<UnspentOutput>)
    )
)]
pub async fn get_utxos(ledger: LedgerData) -> impl Responder {
    let utxos = with_ledger(&ledger, |ledger| {
        Ok(ledger.utxos().iter().cloned().collect::<Vec<UnspentOutput>>())
    })
    .await;

    match utxos {
        Ok(utxos) => HttpResponse::Ok().json(utxos),
        Err(response) => response,
    }
}

/// Get the ledger configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    responses(
        (status = 200, description = "Configuration retrieved successfully", body = LedgerConfig)
    )
)]
pub async fn get_config(ledger: LedgerData) -> impl Responder {
    let config = with_ledger(&ledger, |ledger| Ok(ledger.config().clone())).await;

    match config {
        Ok(config) => HttpResponse::Ok().json(config),
        Err(response) => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::pow::SequentialNonces;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    fn test_data() -> LedgerData {
        let config = LedgerConfig {
            fee: "0.5".parse().unwrap(),
            base_reward: Amount::from_coins(3).unwrap(),
            difficulty: 1,
            genesis_amount: Amount::from_coins(1000).unwrap(),
        };
        let ledger = Ledger::with_nonce_source(config, &mut SequentialNonces::default()).unwrap();
        web::Data::new(Mutex::new(ledger))
    }

    #[actix_web::test]
    async fn test_transfer_and_mine_flow() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post().uri("/api/v1/accounts").to_request();
        let created: AccountResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(created.id, 1);

        let req = test::TestRequest::post()
            .uri("/api/v1/transfers")
            .set_json(serde_json::json!({ "sender": 0, "receiver": 1, "amount": "50" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: TransferResponse = test::read_body_json(resp).await;
        assert_eq!(body.mempool_size, 1);
        assert_eq!(body.transaction.amount, Amount::from_coins(50).unwrap());

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(serde_json::json!({ "miner": 1 }))
            .to_request();
        let mined: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(mined.block.index, 1);
        assert_eq!(mined.block.miner_reward, "3.5".parse().unwrap());

        let req = test::TestRequest::get().uri("/api/v1/accounts/1").to_request();
        let account: AccountResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(account.balance, "53.5".parse().unwrap());

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let chain: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(chain.length, 2);
        assert!(chain.is_valid);
    }

    #[actix_web::test]
    async fn test_rejected_transfer_is_unprocessable() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transfers")
            .set_json(serde_json::json!({ "sender": 0, "receiver": 0, "amount": "5000" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let req = test::TestRequest::post()
            .uri("/api/v1/transfers")
            .set_json(serde_json::json!({ "sender": 0, "receiver": 9, "amount": "1" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let ledger = data.lock().unwrap();
        assert_eq!(ledger.mempool_len(), 0);
        assert_eq!(ledger.circulating_supply(), Amount::from_coins(1000).unwrap());
    }

    #[actix_web::test]
    async fn test_mining_empty_mempool_conflicts() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(serde_json::json!({ "miner": 0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn test_read_only_views() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/api/v1/accounts").to_request();
        let balances: Vec<AccountBalance> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].balance, Amount::from_coins(1000).unwrap());

        let req = test::TestRequest::get().uri("/api/v1/circulation").to_request();
        let points: Vec<CirculationPoint> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(points.len(), 1);

        let req = test::TestRequest::get().uri("/api/v1/utxos").to_request();
        let utxos: Vec<UnspentOutput> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(utxos.len(), 1);

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let validation: ValidationResponse = test::call_and_read_body_json(&app, req).await;
        assert!(validation.is_valid);
        assert!(validation.reason.is_none());

        let req = test::TestRequest::get().uri("/api/v1/rewards").to_request();
        let rewards: Vec<TransactionRecord> = test::call_and_read_body_json(&app, req).await;
        assert!(rewards.is_empty());

        let req = test::TestRequest::get().uri("/api/v1/accounts/7").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_reads_wait_for_the_ledger_off_the_worker() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let ticked = Arc::new(AtomicBool::new(false));
        let ticker = ticked.clone();
        actix_web::rt::spawn(async move {
            actix_web::rt::time::sleep(Duration::from_millis(50)).await;
            ticker.store(true, Ordering::SeqCst);
        });

        // Another thread holds the ledger the way a long search would
        let holder = data.clone();
        let observed = ticked.clone();
        let (locked_tx, locked_rx) = mpsc::channel();
        let busy = thread::spawn(move || {
            let _guard = holder.lock().unwrap();
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(300));
            observed.load(Ordering::SeqCst)
        });
        locked_rx.recv().unwrap();

        let req = test::TestRequest::get().uri("/api/v1/mempool").to_request();
        let mempool: MempoolResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(mempool.size, 0);

        // The runtime kept running other tasks while the request waited
        assert!(busy.join().unwrap());
    }

    #[actix_web::test]
    async fn test_poisoned_ledger_is_internal_error() {
        let data = test_data();
        let app =
            test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let poisoner = data.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("ledger task crashed");
        })
        .join();

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
