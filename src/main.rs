// Entry point for the ledger CLI. Every command opens the store explicitly,
// does its work and lets the handle flush on drop.
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, LevelFilter};
use powledger::cli::{normalize_args, report_usage};
use powledger::{
    address_to_pub_key_hash, convert_address, hash_pub_key, BlockchainError, Blockchain, Command,
    Config, Database, IterationEnd, Opt, Transaction, UTXOSet, Wallets, GLOBAL_CONFIG,
};
use std::process;

fn main() {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    // malformed arguments print usage and exit cleanly
    let opt = match Opt::try_parse_from(normalize_args(std::env::args())) {
        Ok(opt) => opt,
        Err(e) => {
            report_usage(&e);
            process::exit(0);
        }
    };

    if let Err(e) = run_command(opt.command, &GLOBAL_CONFIG) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createblockchain { address } => {
            address_to_pub_key_hash(&address)?;
            let db = Database::open(&config.get_data_dir())?;
            let blockchain = Blockchain::new_chain(&db, &address, config)?;
            let utxo_set = UTXOSet::new(blockchain, &db)?;
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(&config.get_wallet_file())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let db = Database::open(&config.get_data_dir())?;
            let blockchain = Blockchain::init_from_store(&db, config)?;
            let utxo_set = UTXOSet::new(blockchain, &db)?;
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of '{address}': {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(&config.get_wallet_file())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send { from, to, amount } => {
            address_to_pub_key_hash(&from)?;
            address_to_pub_key_hash(&to)?;

            let wallets = Wallets::load(&config.get_wallet_file())?;
            let wallet = wallets.get_wallet(&from).ok_or_else(|| {
                BlockchainError::Wallet(format!("No local wallet holds the key for {from}"))
            })?;

            let db = Database::open(&config.get_data_dir())?;
            let blockchain = Blockchain::init_from_store(&db, config)?;
            let utxo_set = UTXOSet::new(blockchain.clone(), &db)?;

            let mut transaction = Transaction::new_transfer(wallet, &to, amount, &utxo_set)?;
            blockchain.sign_transaction(&mut transaction, wallet)?;
            let reward = Transaction::new_coinbase(&from, "")?;

            let block = blockchain.mine_block(&[transaction, reward])?;
            utxo_set.update(&block)?;
            println!("Success!")
        }
        Command::Printchain => {
            let db = Database::open(&config.get_data_dir())?;
            let blockchain = Blockchain::init_from_store(&db, config)?;
            let mut block_iterator = blockchain.iterator();
            for block in block_iterator.by_ref() {
                println!("Pre block hash: {}", block.get_pre_block_hash());
                println!("Cur block hash: {}", block.get_hash());
                println!("Cur block Timestamp: {}", block.get_timestamp());
                println!("Nonce: {}", block.get_nonce());
                println!("PoW valid: {}", block.validate_pow());

                for tx in block.get_transactions() {
                    println!("- Transaction txid_hex: {}", tx.get_id_hex());
                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let pub_key_hash = hash_pub_key(input.get_pub_key());
                            println!(
                                "-- Input txid = {}, vout = {}, from = {}",
                                HEXLOWER.encode(input.get_txid()),
                                input.get_vout(),
                                convert_address(pub_key_hash.as_slice()),
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        println!(
                            "-- Output value = {}, to = {}",
                            output.get_value(),
                            convert_address(output.get_pub_key_hash()),
                        )
                    }
                }
                println!()
            }
            if let Some(IterationEnd::BrokenLink(hash)) = block_iterator.end_state() {
                return Err(BlockchainError::BrokenChain(hash.clone()).into());
            }
            if let Some(IterationEnd::Corrupted(reason)) = block_iterator.end_state() {
                return Err(BlockchainError::StoreFailure(reason.clone()).into());
            }
        }
        Command::Reindexutxo => {
            let db = Database::open(&config.get_data_dir())?;
            let blockchain = Blockchain::init_from_store(&db, config)?;
            let utxo_set = UTXOSet::new(blockchain, &db)?;
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
    }
    Ok(())
}
