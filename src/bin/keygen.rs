use clap::Parser;
use fog_usage_meter::identity::ElGamalKeyPair;
use fog_usage_meter::keys;
use fog_usage_meter::paillier::PaillierKeyPair;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Writes the biller's Paillier key files and the aggregator's ElGamal key
/// files into a key directory, for the `meter` harness and for deployments
/// that bootstrap from files.
#[derive(Parser, Debug)]
#[command(name = "keygen")]
struct Args {
    #[arg(long, default_value = "keys")]
    key_dir: PathBuf,

    #[arg(long, default_value_t = 1024)]
    paillier_bits: u64,

    #[arg(long, default_value_t = 512)]
    elgamal_bits: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    fs::create_dir_all(&args.key_dir)?;

    let paillier = PaillierKeyPair::generate(args.paillier_bits)?;
    keys::save_paillier_keypair(args.key_dir.join("biller_paillier.key"), &paillier)?;
    keys::save_paillier_public(
        args.key_dir.join("biller_paillier_public.key"),
        paillier.public(),
    )?;

    let elgamal = ElGamalKeyPair::generate(args.elgamal_bits);
    keys::save_elgamal_keypair(args.key_dir.join("aggregator_elgamal.key"), &elgamal)?;
    keys::save_elgamal_public(
        args.key_dir.join("aggregator_elgamal_public.key"),
        elgamal.public(),
    )?;

    info!(dir = %args.key_dir.display(), "wrote biller and aggregator key files");
    Ok(())
}
