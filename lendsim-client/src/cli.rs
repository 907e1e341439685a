use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use lendsim_client::{ClientConfig, SnapshotBuilder};
use lendsim_common::{
    models::{
        action::{ActionContext, ActionRequest},
        MarketId,
    },
    slippage::{ideal_output, worst_case_output, SlippageInputs},
    Address, U256,
};
use lendsim_ethereum::{EthereumRpcClient, EthereumStateProvider};
use tracing::info;
use tracing_appender::{non_blocking::WorkerGuard, rolling};

/// Lendsim CLI - lending state snapshots and migration slippage bounds
///
/// Builds single-block snapshots of Morpho lending state for a user action and computes the
/// per-swap slippage tolerance of a position migration.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    global_args: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct GlobalArgs {
    /// Path to the YAML client configuration.
    #[clap(long, env = "LENDSIM_CONFIG", default_value = "lendsim.yaml")]
    config: PathBuf,

    /// JSON-RPC endpoint, overrides `rpc_url` from the config.
    #[clap(long, env = "RPC_URL", hide_env_values = true)]
    rpc_url: Option<String>,

    /// Write logs to this folder instead of stderr.
    #[clap(long)]
    log_folder: Option<String>,

    /// Enable verbose logging.
    #[clap(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Builds the state snapshot for an action and prints it as JSON.
    Snapshot(SnapshotArgs),
    /// Computes the per-swap slippage tolerance of a migration chain.
    Slippage(SlippageArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SnapshotArgs {
    /// Account performing the action.
    #[clap(long)]
    account: Address,

    /// Print the snapshot as a single line.
    #[clap(long)]
    compact: bool,

    #[command(subcommand)]
    action: ActionCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ActionCommand {
    /// Supply into a vault.
    VaultSupply {
        #[clap(long)]
        vault: Address,
    },
    /// Withdraw from a vault.
    VaultWithdraw {
        #[clap(long)]
        vault: Address,
    },
    /// Repay and withdraw collateral on a market.
    RepayWithdraw {
        #[clap(long)]
        market: MarketId,
    },
    /// Supply collateral and borrow on a market.
    SupplyBorrow {
        #[clap(long)]
        market: MarketId,
        /// The borrow may need liquidity reallocated through the public allocator.
        #[clap(long)]
        reallocate: bool,
    },
}

impl From<ActionCommand> for ActionRequest {
    fn from(command: ActionCommand) -> Self {
        match command {
            ActionCommand::VaultSupply { vault } => ActionRequest::VaultSupply { vault },
            ActionCommand::VaultWithdraw { vault } => ActionRequest::VaultWithdraw { vault },
            ActionCommand::RepayWithdraw { market } => {
                ActionRequest::MarketRepayWithdraw { market_id: market }
            }
            ActionCommand::SupplyBorrow { market, reallocate } => {
                ActionRequest::MarketSupplyBorrow {
                    market_id: market,
                    requires_reallocation: reallocate,
                }
            }
        }
    }
}

/// Amounts are integers in the token's base units.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct SlippageArgs {
    /// Overall tolerance as a fraction, e.g. 0.01 for 1%.
    #[clap(long)]
    tolerance: f64,
    /// Collateral delta supplied or withdrawn directly.
    #[clap(long, default_value = "0")]
    collateral_delta: U256,
    /// Debt delta borrowed or repaid directly.
    #[clap(long, default_value = "0")]
    debt_delta: U256,
    /// Collateral sold by the collateral swap.
    #[clap(long)]
    collateral_flow: U256,
    /// Loan asset bought by the collateral swap.
    #[clap(long)]
    debt_flow: U256,
    #[clap(long, default_value = "18")]
    decimals: u8,
    /// The chain ends with an output conversion swap.
    #[clap(long)]
    output_swap: bool,
    /// A quoted output amount to derive the minimum accepted output for.
    #[clap(long)]
    quoted_amount: Option<U256>,
}

impl From<&SlippageArgs> for SlippageInputs {
    fn from(args: &SlippageArgs) -> Self {
        SlippageInputs {
            overall_tolerance: args.tolerance,
            collateral_delta: args.collateral_delta,
            debt_delta: args.debt_delta,
            collateral_flow: args.collateral_flow,
            debt_flow: args.debt_flow,
            decimals: args.decimals,
            performing_output_swap: args.output_swap,
        }
    }
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = setup_tracing(&cli.global_args)?;

    match cli.command {
        Command::Snapshot(args) => run_snapshot(&cli.global_args, args).await,
        Command::Slippage(args) => run_slippage(&args),
    }
}

fn setup_tracing(args: &GlobalArgs) -> anyhow::Result<WorkerGuard> {
    let log_level = if args.verbose { "debug" } else { "info" };
    let (non_blocking, guard) = match &args.log_folder {
        Some(folder) => tracing_appender::non_blocking(rolling::never(folder, "lendsim.log")),
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(non_blocking)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set up logging subscriber")?;
    Ok(guard)
}

async fn run_snapshot(global: &GlobalArgs, args: SnapshotArgs) -> anyhow::Result<()> {
    let config = ClientConfig::from_yaml_file(&global.config)?.with_rpc_url(global.rpc_url.clone());
    config.validate()?;

    let client = EthereumRpcClient::new(config.rpc_url()?)?
        .with_retry(config.retry.clone())
        .with_batching(config.batching.clone());
    let provider = EthereumStateProvider::new(client, config.contracts.clone());
    info!(
        chain_id = config.chain_id,
        morpho = %provider.contracts().morpho,
        "Connected state provider"
    );

    let builder = SnapshotBuilder::new(
        Arc::new(provider),
        config.registry.clone(),
        config.contracts.general_adapter,
    )
    .with_max_concurrency(config.max_concurrency);
    let context = ActionContext::new(args.account, args.action.into());
    let snapshot = builder.build(&context).await?;

    let output = if args.compact {
        serde_json::to_string(&snapshot)?
    } else {
        serde_json::to_string_pretty(&snapshot)?
    };
    println!("{output}");
    Ok(())
}

fn run_slippage(args: &SlippageArgs) -> anyhow::Result<()> {
    let inputs = SlippageInputs::from(args);
    let slippage = inputs.per_swap_tolerance()?;
    let mut report = serde_json::json!({
        "per_swap_tolerance": slippage.as_fraction(),
        "ideal_output": ideal_output(&inputs),
        "worst_case_output": worst_case_output(&inputs, slippage.as_fraction()),
    });
    if let Some(quoted) = args.quoted_amount {
        report["min_amount_out"] = serde_json::Value::String(
            slippage
                .min_amount_out(quoted)
                .to_string(),
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
