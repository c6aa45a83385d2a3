use clap::{Parser, Subcommand};
use log::error;

// Flags that may also be spelled with a single dash, as in `-address A`.
const SINGLE_DASH_FLAGS: [&str; 4] = ["-address", "-from", "-to", "-amount"];

#[derive(Debug, Parser)]
#[command(name = "powledger")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    #[command(
        name = "createblockchain",
        about = "Create a blockchain and send genesis block reward to ADDRESS"
    )]
    Createblockchain {
        #[arg(long, help = "The address to send genesis block reward to")]
        address: String,
    },
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(name = "getbalance", about = "Get the balance of ADDRESS")]
    GetBalance {
        #[arg(long, help = "The wallet address")]
        address: String,
    },
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(
        name = "send",
        about = "Send AMOUNT of coins from FROM address to TO, mining a block with a reward to FROM"
    )]
    Send {
        #[arg(long, help = "Source wallet address")]
        from: String,
        #[arg(long, help = "Destination wallet address")]
        to: String,
        #[arg(long, help = "Amount to send")]
        amount: u64,
    },
    #[command(name = "printchain", about = "Print all blocks of the blockchain")]
    Printchain,
    #[command(name = "reindexutxo", about = "Rebuild the UTXO index from the chain")]
    Reindexutxo,
}

/// Rewrites single-dash long flags to the `--flag` form clap expects.
pub fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| {
            if SINGLE_DASH_FLAGS.contains(&arg.as_str()) {
                format!("-{arg}")
            } else {
                arg
            }
        })
        .collect()
}

/// Prints a parse failure, or the help text it carries. Returns false when
/// the text could not be written; the failure is logged.
pub fn report_usage(err: &clap::Error) -> bool {
    match err.print() {
        Ok(()) => true,
        Err(io_err) => {
            error!("Failed to print usage: {io_err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Opt, clap::Error> {
        let args = std::iter::once("powledger")
            .chain(args.iter().copied())
            .map(String::from);
        Opt::try_parse_from(normalize_args(args))
    }

    #[test]
    fn test_single_dash_flags() {
        let opt = parse(&["send", "-from", "A", "-to", "B", "-amount", "4"]).unwrap();
        assert_eq!(
            opt.command,
            Command::Send {
                from: "A".to_string(),
                to: "B".to_string(),
                amount: 4
            }
        );

        let opt = parse(&["getbalance", "--address", "A"]).unwrap();
        assert_eq!(
            opt.command,
            Command::GetBalance {
                address: "A".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_arguments() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["send", "-from", "A", "-to", "B", "-amount", "lots"]).is_err());
        assert!(parse(&["createblockchain"]).is_err());
        assert!(parse(&["unknown"]).is_err());
    }

    #[test]
    fn test_usage_reported_for_malformed_arguments() {
        let err = parse(&["getbalance", "-address"]).unwrap_err();
        assert!(report_usage(&err));
    }
}
