use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;

use adhoc_banking::{Bank, CurrentBalance, CurrentOwner, DepositCount, account_entity};
use adhoc_events::{FeedMessage, InMemoryEventBus, InMemoryEventLog};
use adhoc_observability::LogFormat;
use adhoc_projection::{
    CachePolicy, FanoutDispatcher, FeedWorker, IncrementalUpdater, Repository, RepositoryConfig,
};

fn main() -> Result<()> {
    let format = std::env::var("ADHOC_LOG_FORMAT")
        .ok()
        .and_then(|raw| LogFormat::parse(&raw))
        .unwrap_or(LogFormat::Compact);
    adhoc_observability::tracing::init(format);

    let log = Arc::new(InMemoryEventLog::new());
    let bus = Arc::new(InMemoryEventBus::<FeedMessage>::new());

    let balances = Arc::new(IncrementalUpdater::new(Repository::new(
        CurrentBalance::registry()?,
        log.clone(),
        RepositoryConfig::default(),
    )));
    let owners = Arc::new(IncrementalUpdater::new(Repository::new(
        CurrentOwner::registry()?,
        log.clone(),
        RepositoryConfig::default().with_refresh_window(Duration::from_secs(10)),
    )));
    let counts = Arc::new(IncrementalUpdater::new(Repository::new(
        DepositCount::registry()?,
        log.clone(),
        RepositoryConfig::default()
            .with_cache(CachePolicy::Unbounded)
            .with_force_insert(true),
    )));

    let (updated_tx, updated_rx) = mpsc::channel::<CurrentBalance>();
    balances.add_listener(Arc::new(move |b: &CurrentBalance| {
        let _ = updated_tx.send(b.clone());
    }));

    let dispatcher = Arc::new(FanoutDispatcher::new());
    dispatcher.register(balances.clone());
    dispatcher.register(owners.clone());
    dispatcher.register(counts.clone());
    let worker = FeedWorker::spawn("banking-feed", &bus, dispatcher, NonZeroUsize::MIN)?;

    let bank = Bank::new(
        log.clone(),
        bus.clone(),
        Repository::new(CurrentBalance::registry()?, log.clone(), RepositoryConfig::default()),
    );

    let account = bank.open_account("Alice")?;
    let id = account_entity(account);
    // Materialize eagerly so the live feed has an entry to keep current.
    balances.find_by_id(&id)?;

    bank.deposit(account, 10_000)?;
    bank.withdraw(account, 2_550)?;
    bank.change_owner(account, "Bob")?;

    let expected = 7_450;
    loop {
        let balance = updated_rx
            .recv_timeout(Duration::from_secs(5))
            .context("timed out waiting for the live balance")?;
        if balance.balance == expected {
            info!(account = %account, version = balance.version, "live balance caught up");
            break;
        }
    }

    let Some(balance) = balances.find_by_id(&id)? else {
        bail!("account {account} has no events");
    };
    let owner = owners.find_by_id(&id)?;
    let activity = counts.find_by_id(&id)?;

    println!("{}", serde_json::to_string_pretty(&balance)?);
    println!("{}", serde_json::to_string_pretty(&owner)?);
    println!("{}", serde_json::to_string_pretty(&activity)?);

    worker.shutdown();
    Ok(())
}
