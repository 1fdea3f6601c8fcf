//! Account bootstrap
//!
//! Creates the administrator account with an opening balance and prints a
//! development bearer token for it. With `--role customer` it provisions a
//! customer account instead, generating an account number unless one is given.
//!
//! Run with: cargo run --bin seed_admin -- --number ADMIN001 --balance 1000000

use std::str::FromStr;

use rust_decimal::Decimal;
use retail_ledger::auth::TokenService;
use retail_ledger::domain::{generate_account_number, Balance, NewAccount, Role};
use retail_ledger::store::{LedgerStore, PgLedgerStore, StoreError};
use retail_ledger::{db, Config};

fn arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let role = match arg(&args, "--role") {
        Some(raw) => raw.parse::<Role>().map_err(anyhow::Error::msg)?,
        None => Role::Admin,
    };
    let number = arg(&args, "--number").unwrap_or_else(|| match role {
        Role::Admin => "ADMIN001".to_string(),
        Role::Customer => generate_account_number(),
    });
    let name = arg(&args, "--name").unwrap_or_else(|| match role {
        Role::Admin => "Bank Admin".to_string(),
        Role::Customer => "Demo Customer".to_string(),
    });
    let balance = arg(&args, "--balance")
        .map(|raw| Decimal::from_str(&raw))
        .transpose()?
        .unwrap_or_else(|| Decimal::from(1_000_000));

    let config = Config::from_env()?;
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required"))?;

    println!("Connecting to database...");
    let pool = db::connect(url, 2).await?;
    let store = PgLedgerStore::new(pool.clone());

    let account = match store.account_by_number(&number).await? {
        Some(existing) => {
            println!("Account {} already exists, reusing it", number);
            existing
        }
        None => {
            let new = NewAccount::new(number.clone(), name)
                .with_balance(Balance::new(balance)?)
                .with_role(role)
                .verified();
            match store.open_account(new).await {
                Ok(account) => account,
                Err(StoreError::DuplicateAccountNumber(n)) => {
                    anyhow::bail!("Account {} was created concurrently, rerun to reuse it", n)
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    let token = TokenService::new(&config.jwt_secret).issue(account.id, chrono::Duration::days(30))?;

    println!("{} account: {} ({})", account.role, account.account_number, account.id);
    println!("Balance: {}", account.balance);
    println!("Bearer token (30 days):\n{}", token);

    pool.close().await;
    Ok(())
}
