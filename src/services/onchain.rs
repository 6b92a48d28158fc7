use async_trait::async_trait;
use starknet_accounts::{Account, ExecutionEncoding, SingleOwnerAccount};
use starknet_core::types::{
    BlockId, BlockTag, Call, ExecutionResult, Felt, FunctionCall, TransactionFinalityStatus,
    TransactionReceiptWithBlockInfo,
};
use starknet_core::utils::{cairo_short_string_to_felt, get_selector_from_name};
use starknet_providers::jsonrpc::{HttpTransport, JsonRpcClient};
use starknet_providers::Provider;
use starknet_signers::{LocalWallet, SigningKey};
use tokio::time::{sleep, Duration, Instant};
use url::Url;

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        GameSnapshot, GameState, PlacedTile, Placement, PlayerInfo, ReceiptStatus, TxHandle,
    },
};

/// Remote source of truth for one deployment of the game contract.
#[async_trait]
pub trait GameLedger: Send + Sync {
    async fn get_game_state(&self, game_id: u64) -> Result<GameSnapshot>;

    async fn get_player_info(&self, game_id: u64, address: &str) -> Result<PlayerInfo>;

    async fn get_placed_tiles(&self, game_id: u64) -> Result<Vec<PlacedTile>>;

    async fn play_turn(&self, game_id: u64, placements: &[Placement]) -> Result<TxHandle>;

    async fn skip_turn(&self, game_id: u64) -> Result<TxHandle>;

    async fn join_game(&self, game_id: u64, name: &str) -> Result<TxHandle>;

    async fn start_game(&self, game_id: u64) -> Result<TxHandle>;

    /// Polls for a receipt until it is final or `timeout` elapses
    /// (`AppError::ConfirmationTimeout`).
    async fn wait_for_receipt(&self, handle: &TxHandle, timeout: Duration)
        -> Result<ReceiptStatus>;
}

pub struct OnchainInvoker {
    account: SingleOwnerAccount<JsonRpcClient<HttpTransport>, LocalWallet>,
}

pub struct OnchainReader {
    provider: JsonRpcClient<HttpTransport>,
}

impl OnchainInvoker {
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let Some(private_key) = config.player_private_key.as_deref() else {
            return Ok(None);
        };

        let rpc_url = Url::parse(&config.starknet_rpc_url)
            .map_err(|e| AppError::Internal(format!("Invalid RPC URL: {}", e)))?;
        let provider = JsonRpcClient::new(HttpTransport::new(rpc_url));

        let private_key = parse_felt(private_key)?;
        let signer = LocalWallet::from_signing_key(SigningKey::from_secret_scalar(private_key));

        let account_address = parse_felt(&config.player_address)?;
        let chain_id = parse_chain_id(&config.starknet_chain_id)?;

        let mut account = SingleOwnerAccount::new(
            provider,
            signer,
            account_address,
            chain_id,
            ExecutionEncoding::New,
        );
        // Some public RPC providers don't support "pre_confirmed" yet.
        account.set_block_id(BlockId::Tag(BlockTag::Latest));

        Ok(Some(Self { account }))
    }

    pub async fn invoke(&self, call: Call) -> Result<Felt> {
        let result = self
            .account
            .execute_v3(vec![call])
            .send()
            .await
            .map_err(|e| classify_submission_error(&e.to_string()))?;
        Ok(result.transaction_hash)
    }
}

impl OnchainReader {
    pub fn from_config(config: &Config) -> Result<Self> {
        let rpc_url = Url::parse(&config.starknet_rpc_url)
            .map_err(|e| AppError::Internal(format!("Invalid RPC URL: {}", e)))?;
        let provider = JsonRpcClient::new(HttpTransport::new(rpc_url));
        Ok(Self { provider })
    }

    pub async fn call(&self, call: FunctionCall) -> Result<Vec<Felt>> {
        self.provider
            .call(call, BlockId::Tag(BlockTag::Latest))
            .await
            .map_err(|e| AppError::from_provider_message(e.to_string()))
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: &Felt,
    ) -> Result<TransactionReceiptWithBlockInfo> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| AppError::from_provider_message(e.to_string()))
    }
}

/// `GameLedger` backed by a Starknet game contract.
///
/// View layouts (all values are felts):
/// * `get_game_state(game_id)` → `[state, turn, current_player, tiles_remaining,
///   n_players, player.., n_scores, score..]`
/// * `get_player_info(game_id, address)` → `[has_joined, score, n_hand, tile..]`
/// * `get_placed_tiles(game_id)` → `[n_tiles, (x, y, number, turn_placed)..]`
pub struct StarknetLedger {
    reader: OnchainReader,
    invoker: Option<OnchainInvoker>,
    contract: Felt,
    receipt_poll_interval: Duration,
}

impl StarknetLedger {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            reader: OnchainReader::from_config(config)?,
            invoker: OnchainInvoker::from_config(config)?,
            contract: parse_felt(&config.game_contract_address)?,
            receipt_poll_interval: config.receipt_poll_interval(),
        })
    }

    pub fn can_write(&self) -> bool {
        self.invoker.is_some()
    }

    async fn view(&self, entrypoint: &str, calldata: Vec<Felt>) -> Result<Vec<Felt>> {
        self.reader
            .call(FunctionCall {
                contract_address: self.contract,
                entry_point_selector: selector(entrypoint)?,
                calldata,
            })
            .await
    }

    async fn send(&self, entrypoint: &str, calldata: Vec<Felt>) -> Result<TxHandle> {
        let Some(invoker) = self.invoker.as_ref() else {
            return Err(AppError::SubmissionRejected(
                "No signer configured. Set PLAYER_PRIVATE_KEY to submit transactions.".to_string(),
            ));
        };
        let tx_hash = invoker
            .invoke(Call {
                to: self.contract,
                selector: selector(entrypoint)?,
                calldata,
            })
            .await?;
        let handle = TxHandle(format!("{:#x}", tx_hash));
        tracing::info!("Submitted {} transaction {}", entrypoint, handle);
        Ok(handle)
    }
}

#[async_trait]
impl GameLedger for StarknetLedger {
    async fn get_game_state(&self, game_id: u64) -> Result<GameSnapshot> {
        let felts = self
            .view("get_game_state", vec![Felt::from(game_id)])
            .await?;
        decode_game_snapshot(game_id, &felts)
    }

    async fn get_player_info(&self, game_id: u64, address: &str) -> Result<PlayerInfo> {
        let felts = self
            .view(
                "get_player_info",
                vec![Felt::from(game_id), parse_felt(address)?],
            )
            .await?;
        decode_player_info(&felts)
    }

    async fn get_placed_tiles(&self, game_id: u64) -> Result<Vec<PlacedTile>> {
        let felts = self
            .view("get_placed_tiles", vec![Felt::from(game_id)])
            .await?;
        decode_placed_tiles(&felts)
    }

    async fn play_turn(&self, game_id: u64, placements: &[Placement]) -> Result<TxHandle> {
        self.send("play_turn", play_turn_calldata(game_id, placements))
            .await
    }

    async fn skip_turn(&self, game_id: u64) -> Result<TxHandle> {
        self.send("skip_turn", vec![Felt::from(game_id)]).await
    }

    async fn join_game(&self, game_id: u64, name: &str) -> Result<TxHandle> {
        let name = cairo_short_string_to_felt(name)
            .map_err(|e| AppError::BadRequest(format!("Invalid player name: {}", e)))?;
        self.send("join_game", vec![Felt::from(game_id), name]).await
    }

    async fn start_game(&self, game_id: u64) -> Result<TxHandle> {
        self.send("start_game", vec![Felt::from(game_id)]).await
    }

    async fn wait_for_receipt(
        &self,
        handle: &TxHandle,
        timeout: Duration,
    ) -> Result<ReceiptStatus> {
        let tx_hash = parse_felt(&handle.0)?;
        let deadline = Instant::now() + timeout;
        let mut last_error = String::new();

        loop {
            match self.reader.get_transaction_receipt(&tx_hash).await {
                Ok(receipt) => {
                    if let ExecutionResult::Reverted { reason } =
                        receipt.receipt.execution_result()
                    {
                        return Ok(ReceiptStatus::Reverted {
                            reason: reason.clone(),
                        });
                    }
                    if !matches!(
                        receipt.receipt.finality_status(),
                        TransactionFinalityStatus::PreConfirmed
                    ) {
                        return Ok(ReceiptStatus::Succeeded);
                    }
                    last_error = "transaction still pre-confirmed".to_string();
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }

            if Instant::now() + self.receipt_poll_interval >= deadline {
                tracing::warn!("Receipt for {} not final in time: {}", handle, last_error);
                return Err(AppError::ConfirmationTimeout {
                    tx_hash: handle.0.clone(),
                });
            }
            sleep(self.receipt_poll_interval).await;
        }
    }
}

// Internal helper that maps wallet/account errors onto submission failures.
fn classify_submission_error(message: &str) -> AppError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("insufficient")
        || lower.contains("rejected")
        || lower.contains("denied")
        || lower.contains("declined")
        || lower.contains("invalid signature")
    {
        return AppError::SubmissionRejected(message.to_string());
    }
    AppError::from_provider_message(message)
}

// Internal helper that supports `selector` operations.
fn selector(entrypoint: &str) -> Result<Felt> {
    get_selector_from_name(entrypoint)
        .map_err(|e| AppError::Internal(format!("Selector error: {}", e)))
}

// Internal helper that builds inputs for `play_turn`.
fn play_turn_calldata(game_id: u64, placements: &[Placement]) -> Vec<Felt> {
    let mut calldata = Vec::with_capacity(2 + placements.len() * 3);
    calldata.push(Felt::from(game_id));
    calldata.push(Felt::from(placements.len() as u64));
    for placement in placements {
        calldata.push(Felt::from(placement.x));
        calldata.push(Felt::from(placement.y));
        calldata.push(Felt::from(placement.number));
    }
    calldata
}

/// Sequential reader over a view function's return data.
struct FeltCursor<'a> {
    felts: &'a [Felt],
    pos: usize,
    what: &'static str,
}

impl<'a> FeltCursor<'a> {
    fn new(felts: &'a [Felt], what: &'static str) -> Self {
        Self { felts, pos: 0, what }
    }

    fn next(&mut self) -> Result<&'a Felt> {
        let felt = self.felts.get(self.pos).ok_or_else(|| {
            AppError::BlockchainRPC(format!(
                "{} response truncated at index {}",
                self.what, self.pos
            ))
        })?;
        self.pos += 1;
        Ok(felt)
    }

    fn next_u64(&mut self) -> Result<u64> {
        let value = felt_to_u128(self.next()?)?;
        u64::try_from(value)
            .map_err(|_| AppError::BlockchainRPC(format!("{} value out of range", self.what)))
    }

    fn next_u8(&mut self) -> Result<u8> {
        let value = self.next_u64()?;
        u8::try_from(value)
            .map_err(|_| AppError::BlockchainRPC(format!("{} value out of range", self.what)))
    }

    fn next_len(&mut self) -> Result<usize> {
        let len = self.next_u64()? as usize;
        if len > self.felts.len().saturating_sub(self.pos) {
            return Err(AppError::BlockchainRPC(format!(
                "{} declares {} items but response is shorter",
                self.what, len
            )));
        }
        Ok(len)
    }
}

pub fn decode_game_snapshot(game_id: u64, felts: &[Felt]) -> Result<GameSnapshot> {
    let mut cursor = FeltCursor::new(felts, "get_game_state");
    let raw_state = cursor.next_u64()?;
    let state = GameState::from_u64(raw_state).ok_or_else(|| {
        AppError::BlockchainRPC(format!("Unknown game state {}", raw_state))
    })?;
    let turn = cursor.next_u64()?;
    let current_player = cursor.next_u64()? as usize;
    let tiles_remaining = cursor.next_u64()? as u32;

    let n_players = cursor.next_len()?;
    let mut players = Vec::with_capacity(n_players);
    for _ in 0..n_players {
        players.push(format!("{:#x}", cursor.next()?));
    }

    let n_scores = cursor.next_len()?;
    let mut scores = Vec::with_capacity(n_scores);
    for _ in 0..n_scores {
        scores.push(cursor.next_u64()?);
    }

    Ok(GameSnapshot {
        game_id,
        turn,
        current_player,
        players,
        scores,
        state,
        tiles_remaining,
    })
}

pub fn decode_player_info(felts: &[Felt]) -> Result<PlayerInfo> {
    let mut cursor = FeltCursor::new(felts, "get_player_info");
    let has_joined = cursor.next_u64()? != 0;
    let score = cursor.next_u64()?;
    let n_hand = cursor.next_len()?;
    let mut hand = Vec::with_capacity(n_hand);
    for _ in 0..n_hand {
        hand.push(cursor.next_u8()?);
    }
    Ok(PlayerInfo {
        hand,
        score,
        has_joined,
    })
}

pub fn decode_placed_tiles(felts: &[Felt]) -> Result<Vec<PlacedTile>> {
    let mut cursor = FeltCursor::new(felts, "get_placed_tiles");
    let n_tiles = cursor.next_len()?;
    let mut tiles = Vec::with_capacity(n_tiles);
    for _ in 0..n_tiles {
        tiles.push(PlacedTile {
            x: cursor.next_u8()?,
            y: cursor.next_u8()?,
            number: cursor.next_u8()?,
            turn_placed: cursor.next_u64()?,
        });
    }
    Ok(tiles)
}

/// Compares two addresses, tolerating hex/decimal and leading zeroes.
pub fn addr_eq(a: &str, b: &str) -> bool {
    let a_trimmed = a.trim();
    let b_trimmed = b.trim();
    if a_trimmed.eq_ignore_ascii_case(b_trimmed) {
        return true;
    }

    match (parse_felt(a_trimmed), parse_felt(b_trimmed)) {
        (Ok(a_felt), Ok(b_felt)) => a_felt == b_felt,
        _ => false,
    }
}

pub fn parse_chain_id(chain_id: &str) -> Result<Felt> {
    if chain_id.starts_with("0x") {
        return parse_felt(chain_id);
    }
    let hex = hex::encode(chain_id.as_bytes());
    parse_felt(&format!("0x{hex}"))
}

pub fn parse_felt(value: &str) -> Result<Felt> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Empty field element".to_string()));
    }
    if trimmed.starts_with("0x") {
        return Felt::from_hex(trimmed)
            .map_err(|e| AppError::BadRequest(format!("Invalid felt hex: {}", e)));
    }
    Felt::from_dec_str(trimmed)
        .map_err(|e| AppError::BadRequest(format!("Invalid felt dec: {}", e)))
}

pub fn felt_to_u128(value: &Felt) -> Result<u128> {
    let text = value.to_string();
    if let Some(stripped) = text.strip_prefix("0x") {
        u128::from_str_radix(stripped, 16)
            .map_err(|e| AppError::BlockchainRPC(format!("Invalid felt hex: {}", e)))
    } else {
        text.parse::<u128>()
            .map_err(|e| AppError::BlockchainRPC(format!("Invalid felt dec: {}", e)))
    }
}
