use clap::{Parser, Subcommand};
use fhe_ballot::{
    keys, Aggregator, Authority, AuthorityKeys, BallotStore, Error as BallotError, ParameterSet,
    SchemeParameters, Tally, Voter,
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{distributions::Uniform, prelude::Distribution, thread_rng};
use rayon::prelude::*;
use std::{
    error::Error,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fhe-ballot")]
#[command(about = "Secret ballot with homomorphic tallying")]
#[command(version)]
struct Cli {
    /// Ballot store file
    #[arg(long, env = "FHE_BALLOT_STORE", default_value = "encrypted_votes.bin", global = true)]
    store: PathBuf,

    /// Directory holding the authority seed and the public key
    #[arg(long, env = "FHE_BALLOT_KEYS", default_value = "keys", global = true)]
    keys: PathBuf,

    /// Number of candidates on the ballot
    #[arg(long, env = "FHE_BALLOT_CANDIDATES", default_value_t = 10, global = true)]
    candidates: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the authority key pair and publish the public key
    Keygen,

    /// Encrypt a vote and append it to the ballot store
    Vote {
        /// Candidate number; prompts when omitted
        #[arg(short, long)]
        choice: Option<usize>,
    },

    /// Sum every ballot in the store into an encrypted tally
    Tally {
        /// Where to write the encrypted tally
        #[arg(short, long, default_value = "encrypted_tally.bin")]
        output: PathBuf,

        /// Sum ballots on all cores
        #[arg(long)]
        parallel: bool,
    },

    /// Decrypt the tally and print the result
    Decrypt {
        /// Encrypted tally written by `tally`
        #[arg(short, long, default_value = "encrypted_tally.bin")]
        tally: PathBuf,
    },

    /// Run a whole election in memory with random votes
    Simulate {
        /// Number of votes to cast
        #[arg(long, default_value_t = 100)]
        votes: usize,

        /// Sum ballots on all cores
        #[arg(long)]
        parallel: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    // Select verbosity with env_var: e.g. `RUST_LOG=fhe_ballot=debug`
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let params = ParameterSet::default()
        .with_candidates(cli.candidates)
        .build()?;

    match cli.command {
        Commands::Keygen => keygen(&params, &cli.keys),
        Commands::Vote { choice } => vote(&params, &cli.keys, &cli.store, choice),
        Commands::Tally { output, parallel } => tally(&params, &cli.store, &output, parallel),
        Commands::Decrypt { tally } => decrypt(&params, &cli.keys, &tally),
        Commands::Simulate { votes, parallel } => simulate(&params, votes, parallel),
    }
}

fn keygen(params: &Arc<SchemeParameters>, dir: &Path) -> Result<(), Box<dyn Error>> {
    let authority_keys = AuthorityKeys::generate(params, &mut thread_rng());
    authority_keys.save(dir)?;
    println!(
        "\t\x1b[1mPublic key:\x1b[0m\t\t{}",
        keys::public_key_path(dir).display()
    );
    println!(
        "\t\x1b[1mAuthority seed:\x1b[0m\t\t{} (keep private)",
        keys::seed_path(dir).display()
    );
    Ok(())
}

fn vote(
    params: &Arc<SchemeParameters>,
    dir: &Path,
    store: &Path,
    choice: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let public_key = keys::load_public_key(params, dir)?;
    let store = Arc::new(BallotStore::new(store, params.clone()));
    let voter = Voter::new(params.clone(), public_key, store);

    let choice = match choice {
        Some(choice) => choice,
        None => prompt_choice(&voter, params.num_candidates())?,
    };
    voter.cast(choice, &mut thread_rng())?;
    println!("Vote encrypted and saved to file.");
    Ok(())
}

/// Asks until the voter enters a valid candidate number.
fn prompt_choice(voter: &Voter, num_candidates: usize) -> Result<usize, Box<dyn Error>> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("Enter vote (candidate number 1-{num_candidates}): ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            return Err("no vote entered".into());
        };
        let line = line?;
        let parsed = line.trim().parse::<usize>().unwrap_or(0);
        match voter.encoder().validate(parsed) {
            Ok(()) => return Ok(parsed),
            Err(e) if e.is_recoverable() => println!("{e}"),
            Err(e) => return Err(e.into()),
        }
    }
}

fn tally(
    params: &Arc<SchemeParameters>,
    store: &Path,
    output: &Path,
    parallel: bool,
) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(BallotStore::new(store, params.clone()));
    let aggregator = Aggregator::new(params.clone(), store).parallel(parallel);

    let pb: ProgressBar = spinner();
    let tally_timer: Instant = Instant::now();
    let aggregate = match aggregator.tally() {
        Ok(aggregate) => aggregate,
        Err(BallotError::EmptyStore) => {
            pb.finish_and_clear();
            println!("No votes have been cast.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    pb.finish_and_clear();

    if let Some(interrupted) = &aggregate.interrupted {
        eprintln!(
            "\x1b[1mwarning:\x1b[0m only {} ballots could be read: {}",
            interrupted.ballots_read, interrupted.error
        );
    }
    aggregate.tally.save(output)?;
    println!(
        "\t\x1b[1mBallots tallied:\x1b[0m\t{}",
        aggregate.tally.ballots()
    );
    println!(
        "\t\x1b[1mTally Execution time:\x1b[0m\t{:#?}",
        tally_timer.elapsed()
    );
    println!("\t\x1b[1mEncrypted tally:\x1b[0m\t{}", output.display());
    Ok(())
}

fn decrypt(params: &Arc<SchemeParameters>, dir: &Path, tally: &Path) -> Result<(), Box<dyn Error>> {
    let authority = Authority::new(params.clone(), AuthorityKeys::load(params, dir)?);
    let tally = Tally::load(tally, params)?;

    let result = authority.decode(&tally)?;
    if let Some(undercount) = result.undercount() {
        eprintln!("\x1b[1mwarning:\x1b[0m {undercount}");
    }
    println!("Vote counting completed!");
    println!(
        "Noise budget in encrypted total votes: {} bits",
        result.noise_budget()
    );
    println!("Result: ");
    print!("{result}");
    Ok(())
}

fn simulate(
    params: &Arc<SchemeParameters>,
    num_votes: usize,
    parallel: bool,
) -> Result<(), Box<dyn Error>> {
    let main: Instant = Instant::now();

    println!("\n\x1b[1mSecret Ballot\x1b[0m");
    println!("\t\x1b[1mVotes:\x1b[0m\t\t\t{num_votes}");
    println!("\t\x1b[1mCandidates:\x1b[0m\t\t{}", params.num_candidates());
    println!(
        "\t\x1b[1mDegree:\x1b[0m\t\t\t{}",
        params.parameter_set().degree
    );
    println!(
        "\t\x1b[1mPlaintext Modulus:\x1b[0m\t{}",
        params.plaintext_modulus()
    );
    println!(
        "\t\x1b[1mModuli:\x1b[0m\t\t\t{:?}",
        params.parameter_set().moduli
    );

    // Removed when it goes out of scope, whichever way this returns.
    let scratch = tempfile::Builder::new()
        .prefix("fhe-ballot-simulation-")
        .suffix(".bin")
        .tempfile()?;
    let store = Arc::new(BallotStore::new(scratch.path(), params.clone()));
    let authority = Authority::generate(params.clone(), &mut thread_rng());
    let voter = Voter::new(params.clone(), authority.public_key().clone(), store.clone());
    let aggregator = Aggregator::new(params.clone(), store).parallel(parallel);

    // Each voter picks a candidate at random.
    let dist: Uniform<usize> = Uniform::new_inclusive(1, params.num_candidates());
    let votes: Vec<usize> = (0..num_votes)
        .into_par_iter()
        .map(|_| dist.sample(&mut thread_rng()))
        .collect();

    // Voters encrypt independently and append concurrently; the store
    // serializes the appends.
    let pb: ProgressBar = spinner();
    let encryption_timer: Instant = Instant::now();
    let cast: Result<(), BallotError> = votes
        .par_iter()
        .try_for_each(|choice| voter.cast(*choice, &mut thread_rng()));
    pb.finish_and_clear();
    cast?;
    println!(
        "\t\x1b[1mTime to Encrypt Votes:\x1b[0m\t{:#?}",
        encryption_timer.elapsed()
    );

    let pb: ProgressBar = spinner();
    let tally_timer: Instant = Instant::now();
    let aggregate = aggregator.tally();
    pb.finish_and_clear();
    let aggregate = match aggregate {
        Ok(aggregate) => aggregate,
        Err(BallotError::EmptyStore) => {
            println!("No votes have been cast.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!(
        "\t\x1b[1mTally Execution time:\x1b[0m\t{:#?}",
        tally_timer.elapsed()
    );

    let pb: ProgressBar = spinner();
    let decryption_timer: Instant = Instant::now();
    let result = authority.decode(&aggregate.tally)?;
    pb.finish_and_clear();
    println!(
        "\t\x1b[1mTally Decryption time:\x1b[0m\t{:#?}",
        decryption_timer.elapsed()
    );
    println!(
        "\t\x1b[1mNoise budget:\x1b[0m\t\t{} bits",
        result.noise_budget()
    );
    println!(
        "\t\x1b[1mTotal Execution time:\x1b[0m\t{:#?}",
        main.elapsed()
    );

    println!("\t\x1b[1mVote result:\x1b[0m");
    for (i, count) in result.counts().iter().enumerate() {
        println!("\t\tCandidate {}:\t{count}", i + 1);
    }

    // Only possible here because the simulation knows the plaintext votes.
    let mut expected = vec![0u64; params.num_candidates()];
    for choice in &votes {
        expected[choice - 1] += 1;
    }
    if result.counts() != expected.as_slice() {
        warn!(?expected, got = ?result.counts(), "tally does not match the votes cast");
        return Err("tally does not match the votes cast".into());
    }
    info!("tally matches the votes cast");
    Ok(())
}

fn spinner() -> ProgressBar {
    let pb: ProgressBar = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
