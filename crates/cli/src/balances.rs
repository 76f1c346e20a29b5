use std::{io::Write, time::Duration};

use alloy::{
    primitives::Address,
    providers::{DynProvider, Provider},
    sol,
};
use colored::Colorize;
use crossterm::{
    QueueableCommand,
    cursor::MoveTo,
    execute,
    style::Print,
    terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use keysub::{
    CombinedState, Engine, Key, SourceError, Status,
    domain::{Balance, BalanceKey, TokenId},
    source::{PollSource, RemoteSource},
};
use tabled::{Table, Tabled, settings::Style};
use tokio_util::sync::CancellationToken;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
    }
}

pub(crate) fn keys(accounts: &[Address], tokens: &[TokenId]) -> anyhow::Result<Vec<BalanceKey>> {
    if let Some(token) = tokens
        .iter()
        .find(|token| !matches!(token, TokenId::Native | TokenId::Erc20 { .. }))
    {
        return Err(anyhow::anyhow!("balances of {token} cannot be fetched over RPC"));
    }
    Ok(accounts
        .iter()
        .flat_map(|account| tokens.iter().map(|token| BalanceKey::new(account.to_string(), token.clone())))
        .collect())
}

/// Balances refetched every `interval`.
pub(crate) fn source(provider: DynProvider, interval: Duration) -> impl RemoteSource<Value = Balance> {
    PollSource::new(move |key: Key| fetch(provider.clone(), key), interval)
}

async fn fetch(provider: DynProvider, key: Key) -> Result<Balance, SourceError> {
    let BalanceKey { account, token } =
        BalanceKey::parse(&key).map_err(|err| SourceError::Unsupported(err.to_string()))?;
    let owner: Address = account
        .parse()
        .map_err(|_| SourceError::Unsupported(format!("not an EVM account: {account}")))?;

    let free = match token {
        TokenId::Native => provider.get_balance(owner).await.map_err(SourceError::remote)?,
        TokenId::Erc20 { address } => IERC20::new(address, provider)
            .balanceOf(owner)
            .call()
            .await
            .map_err(SourceError::remote)?,
        TokenId::Asset { .. } | TokenId::Foreign { .. } => {
            return Err(SourceError::Unsupported(format!("{token} balances")));
        },
    };
    Ok(Balance::free(free))
}

pub(crate) async fn render(
    engine: Engine<Balance>,
    keys: Vec<BalanceKey>,
    num_updates: Option<u64>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    draw(engine, keys, num_updates, cancellation_token, &mut std::io::stdout()).await
}

/// Redraws the balance table on every view until cancelled. The terminal is
/// restored and the engine shut down whether or not drawing failed.
async fn draw<W: Write>(
    engine: Engine<Balance>,
    keys: Vec<BalanceKey>,
    num_updates: Option<u64>,
    cancellation_token: CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let mut stream = engine.observe(keys.iter().map(BalanceKey::key));

    let mut updates_left = num_updates;

    let drawn = async {
        execute!(out, EnterAlternateScreen, Clear(ClearType::All), MoveTo(0, 0))?;

        loop {
            let view = tokio::select! {
                _ = cancellation_token.cancelled() => break,
                view = stream.next() => match view {
                    Some(view) => view,
                    None => break,
                },
            };
            if updates_left.is_some_and(|count| count == 0) {
                break;
            }

            out.queue(Clear(ClearType::All))?;
            out.queue(MoveTo(0, 0))?;
            out.queue(Print(format!(
                "{} {}  {}\n\n",
                "Balances".bold(),
                chrono::Local::now().format("%H:%M:%S"),
                format!("watching {} of {} keys", engine.watched_keys().len(), keys.len()).dimmed(),
            )))?;

            let mut table = Table::new(
                keys.iter().map(|key| BalanceRow::new(key, view.get(&key.key()).cloned().unwrap_or_default())),
            );
            table.with(Style::sharp());
            out.queue(Print(table))?;
            out.queue(Print("\n\nPress Ctrl+C to exit"))?;
            out.flush()?;

            updates_left = updates_left.map(|count| count.saturating_sub(1));
        }
        anyhow::Ok(())
    }
    .await;

    let restored = execute!(out, LeaveAlternateScreen);
    drop(stream);
    engine.shutdown().await;
    drawn?;
    restored?;
    Ok(())
}

#[derive(Tabled)]
struct BalanceRow {
    #[tabled(rename = "Account")]
    account: String,
    #[tabled(rename = "Token")]
    token: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Free")]
    free: String,
    #[tabled(rename = "Transferable")]
    transferable: String,
}

impl BalanceRow {
    fn new(key: &BalanceKey, state: CombinedState<Balance>) -> Self {
        let status = match state.status {
            Status::Loaded => state.status.to_string().green(),
            Status::Loading => state.status.to_string().yellow(),
            Status::Stale => state.status.to_string().red(),
        };
        let (free, transferable) = match &state.value {
            Some(balance) if state.status.is_loaded() => {
                (balance.free.to_string(), balance.transferable().to_string())
            },
            Some(balance) => (
                balance.free.to_string().dimmed().to_string(),
                balance.transferable().to_string().dimmed().to_string(),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        Self {
            account: key.account.clone(),
            token: key.token.to_string(),
            status: status.to_string(),
            free,
            transferable,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use keysub::{
        EngineBuilder,
        codec::BigInt,
        store::{Backend, MemoryBackend},
        testing::MockSource,
    };

    use super::*;

    /// Terminal whose flushes fail once a loaded row has been drawn.
    #[derive(Default)]
    struct BrokenTerminal {
        written: Vec<u8>,
    }

    impl Write for BrokenTerminal {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if String::from_utf8_lossy(&self.written).contains("loaded") {
                return Err(std::io::Error::other("terminal gone"));
            }
            Ok(())
        }
    }

    #[test]
    fn keys_cover_every_account_token_pair() {
        let alice = address!("0x0000000000000000000000000000000000000a11");
        let bob = address!("0x0000000000000000000000000000000000000b0b");
        let usdc = TokenId::Erc20 { address: address!("0xa9012a055bd4e0eDfF8Ce09f960291C09D5322dC") };

        let pairs = keys(&[alice, bob], &[TokenId::Native, usdc.clone()]).unwrap();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[1], BalanceKey::new(alice.to_string(), usdc));
        assert!(keys(&[alice], &[TokenId::Asset { id: 1 }]).is_err());
    }

    #[test]
    fn stale_values_are_shown_dimmed() {
        colored::control::set_override(false);
        let key = BalanceKey::new("0xabc", TokenId::Native);
        let row = BalanceRow::new(
            &key,
            CombinedState::new(Status::Stale, Some(Balance::free(BigInt::from(42u64)))),
        );
        assert_eq!(row.free, "42");
        assert_eq!(row.token, "native");

        let row = BalanceRow::new(&key, CombinedState::default());
        assert_eq!(row.free, "-");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_redraw_still_shuts_down_engine() {
        let key = BalanceKey::new("0xabc", TokenId::Native);
        let backend = MemoryBackend::new();
        let source = MockSource::new().with_initial(key.key(), Balance::free(42u64));
        let engine = EngineBuilder::new(source).namespace("balances").backend(backend.clone()).start();

        let mut terminal = BrokenTerminal::default();
        let drawn = tokio::time::timeout(
            Duration::from_secs(10),
            draw(engine, vec![key], None, CancellationToken::new(), &mut terminal),
        )
        .await
        .unwrap();
        assert_eq!(drawn.unwrap_err().to_string(), "terminal gone");

        // Shutdown flushed the cache and the alternate screen was left.
        let blob = backend.get_item("balances").unwrap().unwrap();
        assert!(blob.contains("bigint:42"), "{blob}");
        assert!(String::from_utf8_lossy(&terminal.written).ends_with("\x1b[?1049l"));
    }
}
