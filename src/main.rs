use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{error, info, warn};

use unkindle::platform::NativeUnprotect;
use unkindle::{fingerprint, CredentialStore, DeviceIdentity, Error, PidResolver, Result};

/// Path of the credentials file below the local application data folder.
const KINDLE_INFO_SUBPATH: &[&str] = &[
    "Amazon",
    "Kindle For PC",
    "{AMAwzsaPaaZAzmZzZQzgZCAkZ3AjA_AY}",
    "kindle.info",
];

#[derive(Parser)]
#[command(
    name = "unkindle",
    version,
    about = "Strip DRM from Kindle for PC Mobipocket and Topaz books"
)]
struct Cli {
    /// Input book (.prc, .azw, .tpz)
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// Output file to generate
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Path to kindle.info (located automatically when omitted)
    #[arg(short = 'k', long = "kindle-info")]
    kindle_info: Option<PathBuf>,

    /// Additional candidate PID, 8 characters or 10 with checksum
    /// (repeatable)
    #[arg(short = 'p', long = "pid")]
    pid: Vec<String>,

    /// For Topaz files, decompress payload records in the output
    #[arg(short = 'd', long)]
    decompress: bool,

    /// Dump the decrypted credentials file to the log
    #[arg(short = 'v', long = "dump-credentials")]
    dump: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        error!("{}", err);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let info_path = match &cli.kindle_info {
        Some(path) => path.clone(),
        None => locate_kindle_info()?,
    };
    let store = CredentialStore::load(&info_path)?;
    let unprotect = NativeUnprotect;

    if cli.dump {
        store.dump(&unprotect);
    }

    let (input, output) = match (&cli.input, &cli.output) {
        (Some(input), Some(output)) => (input, output),
        (None, None) if cli.dump => return Ok(()),
        (None, _) => return Err(Error::Usage("missing input file name".into())),
        (_, None) => return Err(Error::Usage("missing output file name".into())),
    };

    let extra_pids = validate_pids(&cli.pid);
    let data = fs::read(input)?;
    let identity = DeviceIdentity::current()?;
    let resolver = PidResolver::new(&store, &unprotect, identity);

    let mut out = io::BufWriter::new(fs::File::create(output)?);
    let result = unkindle::strip(&data, &mut out, &resolver, &extra_pids, cli.decompress)
        .and_then(|_| out.flush().map_err(Error::from));
    if let Err(err) = result {
        drop(out);
        let _ = fs::remove_file(output);
        return Err(err);
    }
    info!("wrote {}", output.display());
    Ok(())
}

/// The credentials file lives below the user's local application data
/// folder; outside Windows there is no such location and `-k` is required.
fn locate_kindle_info() -> Result<PathBuf> {
    if cfg!(windows) {
        if let Some(base) = std::env::var_os("LOCALAPPDATA") {
            let mut path = PathBuf::from(base);
            for part in KINDLE_INFO_SUBPATH {
                path.push(part);
            }
            return Ok(path);
        }
    }
    Err(Error::MissingCredential(
        "cannot locate kindle.info, pass its path with -k".into(),
    ))
}

/// Keep well-formed candidate PIDs: checksummed 10-character PIDs are
/// verified and truncated, anything else of the wrong shape is skipped.
fn validate_pids(raw: &[String]) -> Vec<String> {
    let mut pids = Vec::with_capacity(raw.len());
    for pid in raw {
        match pid.len() {
            10 => {
                if fingerprint::verify_pid_checksum(pid) {
                    pids.push(pid[..8].to_string());
                } else {
                    warn!("invalid PID {}, skipping", pid);
                }
            }
            8 => pids.push(pid.clone()),
            _ => warn!("invalid PID length for {}, skipping", pid),
        }
    }
    pids
}
