use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "lendline",
    about = "LendLine: peer-to-peer loan lifecycle client",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Client configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Ledger state file for the local simulated ledger
    #[arg(long, global = true, default_value = "lendline-ledger.json")]
    pub state: PathBuf,

    /// Account to act as (0x-prefixed hex); defaults to the remembered one
    #[arg(long, global = true)]
    pub account: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Connect an account and remember it
    Connect,
    /// Forget the remembered account
    Disconnect,
    /// Show identity and ledger summary
    Status,
    /// List loans
    List(ListArgs),
    /// Show one loan with its payments
    Show(LoanArgs),
    /// Request a new loan
    Request(RequestArgs),
    /// Fund a pending loan
    Fund(FundArgs),
    /// Repay the full remaining balance of a loan
    Pay(LoanArgs),
    /// Mark a loan you funded as defaulted
    Default(LoanArgs),
    /// Cancel your pending loan request
    Cancel(LoanArgs),
    /// Move the simulated ledger clock forward
    Advance(AdvanceArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ViewArg {
    All,
    Borrower,
    Lender,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long, default_value = "all")]
    pub view: ViewArg,
}

#[derive(Args)]
pub struct LoanArgs {
    pub id: u64,
}

#[derive(Args)]
pub struct RequestArgs {
    /// Principal, in whole units (decimals allowed)
    #[arg(long)]
    pub amount: String,
    /// Interest rate in basis points
    #[arg(long)]
    pub rate_bps: u64,
    #[arg(long)]
    pub days: u64,
    #[arg(long)]
    pub purpose: String,
    /// Collateral, in whole units (decimals allowed)
    #[arg(long)]
    pub collateral: String,
}

#[derive(Args)]
pub struct FundArgs {
    pub id: u64,
    /// Must equal the principal; defaults to it
    #[arg(long)]
    pub amount: Option<String>,
}

#[derive(Args)]
pub struct AdvanceArgs {
    #[arg(long)]
    pub secs: u64,
}
