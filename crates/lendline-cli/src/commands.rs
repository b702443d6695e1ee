use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::{ColoredString, Colorize};
use serde::Serialize;

use lendline_ledger::InMemoryLedger;
use lendline_sdk::{
    Address, Amount, ClientConfig, LendingClient, Loan, LoanAction, LoanId, LoanStatus,
    LoanTerms, LoanView, MutationOutcome, SdkError,
};
use lendline_session::{IdentityStore, InMemoryWallet};

use crate::cli::*;
use crate::state;

struct Invocation {
    config: ClientConfig,
    ledger: InMemoryLedger,
    state_path: PathBuf,
    store: IdentityStore,
    account: Option<Address>,
    format: OutputFormat,
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    let store_path = config
        .identity_store
        .clone()
        .unwrap_or_else(|| cli.state.with_extension("identity"));
    config.identity_store = Some(store_path.clone());

    let account = cli
        .account
        .as_deref()
        .map(str::parse::<Address>)
        .transpose()
        .context("invalid --account")?;

    let ctx = Invocation {
        config,
        ledger: state::open_ledger(&cli.state)?,
        state_path: cli.state,
        store: IdentityStore::new(store_path),
        account,
        format: cli.format,
    };

    match cli.command {
        Command::Connect => cmd_connect(&ctx).await,
        Command::Disconnect => cmd_disconnect(&ctx),
        Command::Advance(args) => cmd_advance(&ctx, args),
        Command::Status => cmd_status(&ctx).await,
        Command::List(args) => cmd_list(&ctx, args).await,
        Command::Show(args) => cmd_show(&ctx, args).await,
        Command::Request(args) => cmd_request(&ctx, args).await,
        Command::Fund(args) => cmd_fund(&ctx, args).await,
        Command::Pay(args) => {
            let client = open_client(&ctx).await?;
            let result = client.make_payment(LoanId(args.id)).await;
            finish_mutation(&ctx, &client, result)
        }
        Command::Default(args) => {
            let client = open_client(&ctx).await?;
            let result = client.default_loan(LoanId(args.id)).await;
            finish_mutation(&ctx, &client, result)
        }
        Command::Cancel(args) => {
            let client = open_client(&ctx).await?;
            let result = client.cancel_loan(LoanId(args.id)).await;
            finish_mutation(&ctx, &client, result)
        }
    }
}

/// Bind to `--account`, or silently to the remembered account.
async fn open_client(ctx: &Invocation) -> anyhow::Result<LendingClient> {
    let ledger = Arc::new(ctx.ledger.clone());
    if let Some(account) = ctx.account {
        let client = LendingClient::new(
            ctx.config.clone(),
            Arc::new(InMemoryWallet::new(account)),
            ledger,
        );
        client.connect().await?;
        return Ok(client);
    }

    let Some(remembered) = ctx.store.load()? else {
        bail!("no account connected; run `lendline connect --account <0x..>` first");
    };
    let client = LendingClient::new(
        ctx.config.clone(),
        Arc::new(InMemoryWallet::authorized_as(remembered)),
        ledger,
    );
    if client.restore().await?.is_none() {
        bail!("remembered account is no longer available; connect again");
    }
    Ok(client)
}

async fn cmd_connect(ctx: &Invocation) -> anyhow::Result<()> {
    if ctx.account.is_none() {
        bail!("connect needs --account <0x..>");
    }
    let client = open_client(ctx).await?;
    let identity = client.identity().context("connect did not bind an identity")?;
    let mine = client.my_loans();
    match ctx.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "identity": identity,
            "borrowed": mine.as_borrower,
            "lent": mine.as_lender,
        })),
        OutputFormat::Text => {
            println!("{} Connected as {}", "✓".green().bold(), identity.to_string().cyan());
            println!(
                "  {} borrowed, {} funded, {} loans on ledger",
                mine.as_borrower.len().to_string().bold(),
                mine.as_lender.len().to_string().bold(),
                client.list_loans().len()
            );
            Ok(())
        }
    }
}

fn cmd_disconnect(ctx: &Invocation) -> anyhow::Result<()> {
    ctx.store.clear()?;
    if ctx.format == OutputFormat::Text {
        println!("{} Disconnected", "✓".green());
    }
    Ok(())
}

fn cmd_advance(ctx: &Invocation, args: AdvanceArgs) -> anyhow::Result<()> {
    let clock = ctx.ledger.advance_time(args.secs)?;
    state::save_ledger(&ctx.state_path, &ctx.ledger)?;
    match ctx.format {
        OutputFormat::Json => print_json(&serde_json::json!({ "clock": clock })),
        OutputFormat::Text => {
            println!("Ledger clock now {}", clock.to_string().bold());
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct StatusView {
    identity: Option<Address>,
    ledger: String,
    contract: Option<Address>,
    clock: u64,
    loans: usize,
    borrowed: usize,
    lent: usize,
    skipped: usize,
}

async fn cmd_status(ctx: &Invocation) -> anyhow::Result<()> {
    let client = open_client(ctx).await?;
    let snapshot = client.snapshot();
    let status = StatusView {
        identity: client.identity(),
        ledger: ctx.config.ledger.name.clone(),
        contract: ctx.config.ledger.contract,
        clock: ctx.ledger.now(),
        loans: snapshot.loans.len(),
        borrowed: snapshot.my_loans.as_borrower.len(),
        lent: snapshot.my_loans.as_lender.len(),
        skipped: snapshot.skipped.len(),
    };
    if ctx.format == OutputFormat::Json {
        return print_json(&status);
    }

    match status.identity {
        Some(who) => println!("Account: {}", who.to_string().cyan()),
        None => println!("Account: {}", "not connected".dimmed()),
    }
    println!("Ledger: {}", status.ledger.bold());
    if let Some(contract) = status.contract {
        println!("Contract: {contract}");
    }
    println!("Clock: {}", status.clock);
    println!(
        "Loans: {} total, {} borrowed, {} funded",
        status.loans.to_string().bold(),
        status.borrowed,
        status.lent
    );
    for skipped in &snapshot.skipped {
        println!(
            "  {} loan {} unreadable: {}",
            "!".yellow().bold(),
            skipped.loan_id,
            skipped.reason
        );
    }
    Ok(())
}

async fn cmd_list(ctx: &Invocation, args: ListArgs) -> anyhow::Result<()> {
    let client = open_client(ctx).await?;
    let view = match args.view {
        ViewArg::All => LoanView::All,
        ViewArg::Borrower => LoanView::AsBorrower,
        ViewArg::Lender => LoanView::AsLender,
    };
    let loans = client.loans(view);
    if ctx.format == OutputFormat::Json {
        return print_json(&loans);
    }
    if loans.is_empty() {
        println!("No loans.");
        return Ok(());
    }
    for loan in &loans {
        println!(
            "{:>5}  {:<10} {:>12} @ {:>6}  {:>4}d  {:>5.1}%  {}",
            loan.id.to_string().yellow(),
            status_label(loan.status),
            loan.principal.to_string(),
            format_rate(loan.interest_rate_bps),
            loan.duration_days(),
            loan.progress() * 100.0,
            loan.purpose
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct LoanDetail<'a> {
    #[serde(flatten)]
    loan: &'a Loan,
    available_actions: Vec<LoanAction>,
}

async fn cmd_show(ctx: &Invocation, args: LoanArgs) -> anyhow::Result<()> {
    let client = open_client(ctx).await?;
    let id = LoanId(args.id);
    let loan = client
        .loan(id)
        .with_context(|| format!("loan {id} not found"))?;
    let actions = client.available_actions(id);
    if ctx.format == OutputFormat::Json {
        return print_json(&LoanDetail {
            loan: &loan,
            available_actions: actions,
        });
    }

    println!("Loan {} {}", loan.id.to_string().yellow().bold(), status_label(loan.status));
    println!("  Borrower:   {}", loan.borrower);
    match loan.lender {
        Some(lender) => println!("  Lender:     {lender}"),
        None => println!("  Lender:     {}", "none".dimmed()),
    }
    println!("  Principal:  {}", loan.principal);
    println!("  Collateral: {}", loan.collateral);
    println!("  Rate:       {}", format_rate(loan.interest_rate_bps));
    println!("  Duration:   {} days", loan.duration_days());
    println!("  Purpose:    {}", loan.purpose);
    println!(
        "  Repaid:     {} / {} ({:.1}%)",
        loan.repaid_amount,
        loan.total_amount_due,
        loan.progress() * 100.0
    );
    if let Some(due) = loan.next_payment_due_at {
        println!("  Next due:   {}", due.to_rfc3339());
    }
    if !loan.payments.is_empty() {
        println!("  Payments:");
        for payment in &loan.payments {
            println!(
                "    {}  {}  remaining {}",
                payment.timestamp.to_rfc3339().dimmed(),
                payment.amount.to_string().green(),
                payment.remaining_balance_after
            );
        }
    }
    if !actions.is_empty() {
        let names: Vec<&str> = actions.iter().map(|a| a.operation_name()).collect();
        println!("  You can:    {}", names.join(", ").cyan());
    }
    Ok(())
}

async fn cmd_request(ctx: &Invocation, args: RequestArgs) -> anyhow::Result<()> {
    let terms = LoanTerms {
        amount: Amount::parse_decimal(&args.amount).context("invalid --amount")?,
        interest_rate_bps: args.rate_bps,
        duration_days: args.days,
        purpose: args.purpose,
        collateral: Amount::parse_decimal(&args.collateral).context("invalid --collateral")?,
    };
    let client = open_client(ctx).await?;
    let result = client.request_loan(terms).await;
    finish_mutation(ctx, &client, result)
}

async fn cmd_fund(ctx: &Invocation, args: FundArgs) -> anyhow::Result<()> {
    let client = open_client(ctx).await?;
    let id = LoanId(args.id);
    let amount = match args.amount.as_deref() {
        Some(text) => Amount::parse_decimal(text).context("invalid --amount")?,
        None => {
            client
                .loan(id)
                .with_context(|| format!("loan {id} not found"))?
                .principal
        }
    };
    let result = client.fund_loan(id, amount).await;
    finish_mutation(ctx, &client, result)
}

#[derive(Serialize)]
struct OutcomeView {
    intent: String,
    tx: String,
    loan_id: Option<LoanId>,
    status: Option<LoanStatus>,
    warning: Option<String>,
}

/// Persist the ledger whatever happened, then report.
fn finish_mutation(
    ctx: &Invocation,
    client: &LendingClient,
    result: Result<MutationOutcome, SdkError>,
) -> anyhow::Result<()> {
    state::save_ledger(&ctx.state_path, &ctx.ledger)?;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(SdkError::Lifecycle(e)) if e.is_indeterminate() => {
            bail!("outcome unknown: {e}");
        }
        Err(e) => return Err(e.into()),
    };

    if ctx.format == OutputFormat::Json {
        return print_json(&OutcomeView {
            intent: outcome.intent.to_string(),
            tx: outcome.tx.to_hex(),
            loan_id: outcome.loan_id,
            status: outcome.status,
            warning: outcome.warning.as_ref().map(ToString::to_string),
        });
    }

    let target = outcome
        .loan_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "?".into());
    match outcome.status {
        Some(status) => println!(
            "{} Loan {} is now {} (tx {})",
            "✓".green().bold(),
            target.yellow(),
            status_label(status),
            outcome.tx
        ),
        None => println!("{} Confirmed (tx {})", "✓".green().bold(), outcome.tx),
    }
    if let Some(warning) = &outcome.warning {
        println!("  {} {warning}", "!".yellow().bold());
    }
    if let Some(loan) = outcome.loan_id.and_then(|id| client.loan(id)) {
        if loan.status.is_active() {
            println!("  Remaining: {}", loan.remaining_balance());
        }
    }
    Ok(())
}

fn status_label(status: LoanStatus) -> ColoredString {
    let label = status.label();
    match status {
        LoanStatus::Pending => label.yellow(),
        LoanStatus::Funded | LoanStatus::Repaying => label.cyan(),
        LoanStatus::Completed => label.green(),
        LoanStatus::Defaulted => label.red(),
        LoanStatus::Cancelled => label.dimmed(),
    }
}

fn format_rate(bps: u64) -> String {
    format!("{}.{:02}%", bps / 100, bps % 100)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_render_as_percent() {
        assert_eq!(format_rate(500), "5.00%");
        assert_eq!(format_rate(1_250), "12.50%");
        assert_eq!(format_rate(7), "0.07%");
    }

    fn cli(state: &std::path::Path, account: Option<Address>, command: Command) -> Cli {
        Cli {
            command,
            config: None,
            state: state.to_path_buf(),
            account: account.map(|a| a.to_hex()),
            verbose: false,
            format: OutputFormat::Json,
        }
    }

    #[tokio::test]
    async fn commands_share_state_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("ledger.json");
        let alice = Address::derive("alice");
        let bob = Address::derive("bob");

        run_command(cli(&state_path, Some(alice), Command::Connect))
            .await
            .unwrap();
        run_command(cli(
            &state_path,
            None,
            Command::Request(RequestArgs {
                amount: "100".into(),
                rate_bps: 1_000,
                days: 30,
                purpose: "tools".into(),
                collateral: "1.5".into(),
            }),
        ))
        .await
        .unwrap();
        run_command(cli(
            &state_path,
            Some(bob),
            Command::Fund(FundArgs { id: 0, amount: None }),
        ))
        .await
        .unwrap();
        run_command(cli(&state_path, Some(alice), Command::Pay(LoanArgs { id: 0 })))
            .await
            .unwrap();

        let ledger = state::open_ledger(&state_path).unwrap();
        let record = &ledger.export_state().loans[0];
        assert_eq!(record.status, LoanStatus::Completed.code());
        assert_eq!(record.lender, bob);
        assert_eq!(record.repaid_amount, Amount::from_units(110).as_wei());
    }

    #[tokio::test]
    async fn commands_without_account_fail() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("ledger.json");
        assert!(run_command(cli(&state_path, None, Command::Status))
            .await
            .is_err());
        assert!(run_command(cli(&state_path, None, Command::Connect))
            .await
            .is_err());
    }
}
