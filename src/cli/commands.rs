//! CLI command implementations

use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::clock::{Clock, ManualClock, SystemClock};
use crate::config::Config;
use crate::metatx::{DevSigner, MetaTxSettings, SignedMetaTxStore};
use crate::notify::NotificationCenter;
use crate::rpc::JsonRpcClient;
use crate::session::{SessionConfig, VaultSession};
use crate::storage::{JsonFileStore, KeyValueStore, MemoryStore};
use crate::tokens::{AccountTokens, TokenCache, WalletBalances};
use crate::units::{format_amount, parse_amount, ETH_DECIMALS};
use crate::vault::types::{MetaTxAction, MetaTxKey, TransactionRecord, TxId};
use crate::vault::{parse_address, SandboxConfig, SandboxVault, VaultClient, WithdrawalRequest};
use crate::wallet::WalletConnection;

async fn open_store(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    let store = JsonFileStore::open(&config.storage.path)
        .await
        .with_context(|| format!("Failed to open {}", config.storage.path.display()))?;
    Ok(Arc::new(store))
}

fn rpc_client(config: &Config) -> Result<JsonRpcClient> {
    Ok(JsonRpcClient::new(&config.rpc.endpoint, config.rpc_timeout())?)
}

fn require_vault(config: &Config) -> Result<Address> {
    config.vault_address()?.context(
        "vault.address is not configured (set it in the config file or SANDBLOX__VAULT__ADDRESS)",
    )
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check RPC reachability and the configured chain
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== HEALTH CHECK ===\n");

    let rpc = rpc_client(config)?;
    let mut healthy = true;

    print!("RPC endpoint... ");
    let started = Instant::now();
    match rpc.chain_id().await {
        Ok(chain_id) if chain_id == config.vault.chain_id => {
            println!("OK ({}ms, chain {})", started.elapsed().as_millis(), chain_id);
        }
        Ok(chain_id) => {
            println!(
                "WRONG NETWORK: node reports chain {}, vault.chain_id is {}",
                chain_id, config.vault.chain_id
            );
            healthy = false;
        }
        Err(e) => {
            println!("FAILED: {}", e);
            healthy = false;
        }
    }

    if let Some(vault) = config.vault_address()? {
        print!("Vault balance... ");
        match rpc.get_balance(vault).await {
            Ok(balance) => println!("{} ETH", format_amount(balance, ETH_DECIMALS)),
            Err(e) => {
                println!("FAILED: {}", e);
                healthy = false;
            }
        }
    } else {
        println!("Vault... not configured");
    }

    print!("Storage... ");
    match open_store(config).await {
        Ok(_) => println!("OK ({})", config.storage.path.display()),
        Err(e) => {
            println!("FAILED: {}", e);
            healthy = false;
        }
    }

    println!();
    if !healthy {
        anyhow::bail!("Health check failed");
    }
    println!("All checks passed");
    Ok(())
}

/// Native and token balances of an account (the vault by default)
pub async fn balance(config: &Config, account: Option<String>, tokens: Vec<String>) -> Result<()> {
    let account = match account {
        Some(raw) => parse_address(&raw)?,
        None => require_vault(config)?,
    };

    let mut token_addrs = tokens
        .iter()
        .map(|raw| parse_address(raw))
        .collect::<crate::Result<Vec<_>>>()?;

    // Fall back to the tracked list
    if token_addrs.is_empty() {
        let cache = TokenCache::new(
            open_store(config).await?,
            Arc::new(AccountTokens::new(Arc::new(rpc_client(config)?), account)),
        );
        cache.hydrate().await?;
        token_addrs = cache.addresses().await;
    }

    let balances = WalletBalances::new(Arc::new(rpc_client(config)?));
    let snapshot = balances.snapshot(account, &token_addrs).await?;

    println!("\n=== BALANCES: {} ===\n", snapshot.account);
    println!("ETH: {}", format_amount(snapshot.native, ETH_DECIMALS));

    for line in &snapshot.tokens {
        match (&line.balance, &line.metadata) {
            (Some(balance), Some(meta)) => println!(
                "{:<8} {} ({})",
                meta.symbol,
                format_amount(*balance, meta.decimals),
                line.token
            ),
            (Some(balance), None) => println!("{:<8} {} ({})", "?", balance, line.token),
            _ => println!(
                "{:<8} error: {} ({})",
                "?",
                line.error.as_deref().unwrap_or("unknown"),
                line.token
            ),
        }
    }

    Ok(())
}

async fn vault_token_cache(config: &Config) -> Result<TokenCache> {
    let vault = require_vault(config)?;
    let cache = TokenCache::new(
        open_store(config).await?,
        Arc::new(AccountTokens::new(Arc::new(rpc_client(config)?), vault)),
    );
    cache.hydrate().await?;
    Ok(cache)
}

/// List tracked tokens from the local cache
pub async fn tokens_list(config: &Config) -> Result<()> {
    let cache = vault_token_cache(config).await?;
    let tokens = cache.tokens().await;

    println!("\n=== TRACKED TOKENS ===\n");
    if tokens.is_empty() {
        println!("No tracked tokens.");
        return Ok(());
    }

    println!("{:<44} {:<8} {:>24} {}", "ADDRESS", "SYMBOL", "BALANCE", "STATUS");
    println!("{}", "-".repeat(90));
    for (address, state) in tokens {
        let (symbol, balance) = match &state.metadata {
            Some(meta) => (meta.symbol.clone(), format_amount(state.balance, meta.decimals)),
            None => ("?".to_string(), state.balance.to_string()),
        };
        println!(
            "{:<44} {:<8} {:>24} {}",
            address.to_string(),
            symbol,
            balance,
            state.error.as_deref().unwrap_or("ok")
        );
    }
    println!();
    Ok(())
}

pub async fn tokens_add(config: &Config, token: &str) -> Result<()> {
    let token = parse_address(token)?;
    let cache = vault_token_cache(config).await?;
    let state = cache.add_token(token).await?;

    match (&state.error, &state.metadata) {
        (Some(err), _) => warn!(
            "Token {} tracked, but its balance could not be read: {}",
            token, err
        ),
        (None, Some(meta)) => println!(
            "Tracking {} ({}): {}",
            meta.symbol,
            token,
            format_amount(state.balance, meta.decimals)
        ),
        (None, None) => println!("Tracking {}", token),
    }
    Ok(())
}

pub async fn tokens_remove(config: &Config, token: &str) -> Result<()> {
    let token = parse_address(token)?;
    let cache = vault_token_cache(config).await?;
    if cache.remove_token(token).await? {
        println!("Stopped tracking {}", token);
    } else {
        println!("{} was not tracked", token);
    }
    Ok(())
}

pub async fn tokens_refresh(config: &Config) -> Result<()> {
    let cache = vault_token_cache(config).await?;
    cache.refresh_all().await?;
    tokens_list(config).await
}

/// Show meta-transaction settings
pub async fn settings_show(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let settings = MetaTxSettings::load_or(store.as_ref(), config.meta_tx_defaults()).await?;

    println!("\n=== META-TX SETTINGS ===\n");
    println!("Deadline: {}s after signing", settings.deadline);
    println!("Max gas price: {} gwei", settings.max_gas_price_gwei());
    Ok(())
}

pub async fn settings_set(
    config: &Config,
    deadline: Option<u64>,
    max_gas_price: Option<String>,
) -> Result<()> {
    let store = open_store(config).await?;
    let mut settings = MetaTxSettings::load_or(store.as_ref(), config.meta_tx_defaults()).await?;

    if let Some(deadline) = deadline {
        settings.deadline = deadline;
    }
    if let Some(raw) = max_gas_price {
        settings.max_gas_price = parse_amount(&raw, 9)?;
    }

    settings.save(store.as_ref()).await?;
    info!("Meta-tx settings saved");
    settings_show(config).await
}

/// List signed meta-transactions awaiting broadcast
pub async fn signed_list(config: &Config) -> Result<()> {
    let store = SignedMetaTxStore::new(open_store(config).await?, require_vault(config)?);
    let entries = store.list().await?;
    let now = SystemClock.now();

    println!("\n=== SIGNED META-TRANSACTIONS ===\n");
    if entries.is_empty() {
        println!("Nothing signed.");
        return Ok(());
    }

    println!("{:<16} {:<22} {:<22} {}", "KEY", "TYPE", "SIGNED", "DEADLINE");
    println!("{}", "-".repeat(80));
    for (key, stored) in entries {
        let signed_at = chrono::DateTime::from_timestamp(stored.metadata.timestamp as i64, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| stored.metadata.timestamp.to_string());
        let deadline = stored.signed.payload.params.deadline;
        println!(
            "{:<16} {:<22} {:<22} {}{}",
            key.to_string(),
            stored.metadata.record_type,
            signed_at,
            deadline,
            if deadline < now { " (expired)" } else { "" }
        );
    }
    println!();
    Ok(())
}

/// Delete one stored signature, or all of them
pub async fn signed_clear(
    config: &Config,
    tx_id: Option<TxId>,
    action: Option<String>,
    force: bool,
) -> Result<()> {
    let store = SignedMetaTxStore::new(open_store(config).await?, require_vault(config)?);

    if let Some(tx_id) = tx_id {
        let action: MetaTxAction = action
            .as_deref()
            .unwrap_or("approve")
            .parse()?;
        let key = MetaTxKey::new(tx_id, action);
        if store.remove(&key).await? {
            println!("Removed {}", key);
        } else {
            println!("No signature stored for {}", key);
        }
        return Ok(());
    }

    if !force {
        let confirmed = Confirm::new()
            .with_prompt("Delete every stored signature for this vault?")
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Clear cancelled by user");
            return Ok(());
        }
    }

    store.clear().await?;
    println!("Cleared {}", store.namespace());
    Ok(())
}

fn print_transactions(records: &[TransactionRecord]) {
    println!("{:<6} {:<15} {:<10} {:>24} {}", "ID", "KIND", "STATUS", "AMOUNT", "TO");
    println!("{}", "-".repeat(100));
    for record in records {
        println!(
            "{:<6} {:<15} {:<10} {:>24} {}",
            record.tx_id,
            record.operation_kind.to_string(),
            record.status.to_string(),
            record.amount.to_string(),
            record.recipient
        );
    }
}

/// Walk through the withdrawal lifecycle against an in-memory vault
pub async fn demo(config: &Config) -> Result<()> {
    println!("\n=== SANDBOX WALKTHROUGH ===\n");

    let timelock = config.tracker.default_timelock_secs;
    let clock = Arc::new(ManualClock::new(SystemClock.now()));
    let owner = Arc::new(DevSigner::from_seed("sandbox-owner"));
    let broadcaster = Arc::new(DevSigner::from_seed("sandbox-broadcaster"));

    let sandbox = Arc::new(SandboxVault::new(
        SandboxConfig::new(owner.address(), broadcaster.address()).with_timelock(timelock),
        &owner,
        clock.clone(),
    ));
    sandbox.fund_eth(parse_amount("10", ETH_DECIMALS)?);

    let client = Arc::new(VaultClient::new(
        sandbox.clone(),
        sandbox.clone(),
        sandbox.address(),
        sandbox.chain_id(),
    ));
    let notices = Arc::new(NotificationCenter::new(config.notifications.max_messages));
    let wallet = Arc::new(WalletConnection::connected(owner.clone(), sandbox.chain_id()));

    let session = VaultSession::new(
        client,
        wallet.clone(),
        Arc::new(MemoryStore::new()),
        clock.clone(),
        SessionConfig {
            poll_interval: config.poll_interval(),
            fallback_timelock_secs: timelock,
            meta_tx_defaults: config.meta_tx_defaults(),
        },
    )
    .with_notifier(notices.clone());

    session.initialize().await?;
    println!("Vault: {}", sandbox.address());
    println!("Owner: {}", owner.address());
    println!("Broadcaster: {}", broadcaster.address());
    println!("Timelock: {}s\n", timelock);

    let recipient = Address::repeat_byte(0x11);

    // Timelocked path
    let receipt = session
        .request_withdrawal(WithdrawalRequest::eth(recipient, parse_amount("1", ETH_DECIMALS)?))
        .await?;
    let first = receipt.tx_id.context("request receipt carried no transaction id")?;
    println!("Requested withdrawal {} (tx {})", first, receipt.tx_hash);

    if session.approve(first).await.is_err() {
        println!("Early approval rejected as expected");
    }

    clock.advance(timelock / 2);
    if let Some(progress) = session.progress(first).await {
        println!("Halfway: {:.0}% elapsed, ready: {}", progress.progress, progress.is_ready);
    }

    clock.advance(timelock - timelock / 2);
    session.approve(first).await?;
    println!("Approved withdrawal {} after the timelock", first);

    // Meta-transaction path
    let receipt = session
        .request_withdrawal(WithdrawalRequest::eth(recipient, parse_amount("2", ETH_DECIMALS)?))
        .await?;
    let second = receipt.tx_id.context("request receipt carried no transaction id")?;
    session.sign_meta_tx(second, MetaTxAction::Cancel).await?;
    println!("Owner signed cancellation of {}", second);

    wallet.connect(broadcaster.clone(), sandbox.chain_id()).await;
    session.broadcast_meta_tx(second, MetaTxAction::Cancel).await?;
    println!("Broadcaster submitted cancellation of {}", second);

    println!("\n=== TRANSACTIONS ===\n");
    print_transactions(&session.transactions().await);

    let balance = session.eth_balance().await.unwrap_or(U256::ZERO);
    println!("\nVault balance: {} ETH", format_amount(balance, ETH_DECIMALS));
    println!(
        "Recipient balance: {} ETH",
        format_amount(sandbox.account_balance(recipient), ETH_DECIMALS)
    );

    println!("\n=== NOTIFICATIONS ===\n");
    for notice in notices.messages() {
        println!("[{}] {}: {}", notice.kind, notice.title, notice.description);
    }

    session.shutdown();
    Ok(())
}
