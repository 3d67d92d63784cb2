use std::path::PathBuf;

use clap::Parser;
use dvbsi_reader::constants::DEFAULT_QUEUE_DEPTH;
use dvbsi_reader::{run, Options, Reporter};
use log::{info, warn};
use tokio::sync::watch;

#[derive(Parser)]
#[clap(about = "Decode PSI/SI tables from an MPEG transport stream file")]
struct Opt {
    /// Transport stream file (188-byte packets)
    #[clap(long, short)]
    input: PathBuf,

    /// Extra PMT PID to follow (decimal or 0x-prefixed hex); repeatable
    #[clap(long = "pmt-pid", value_parser = parse_pid)]
    pmt_pids: Vec<u16>,

    /// Do not subscribe the PMT PIDs announced in the PAT
    #[clap(long, default_value_t = false)]
    no_follow_pat: bool,

    /// Fragments queued per worker before the reader waits
    #[clap(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,

    /// More logging (-v debug, -vv trace)
    #[clap(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_pid(s: &str) -> Result<u16, String> {
    let pid = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid PID {s:?}: {e}"))?;
    if pid > 0x1FFF {
        return Err(format!("PID {pid} exceeds 0x1FFF"));
    }
    Ok(pid)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let level = match opt.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping");
            let _ = stop_tx.send(true);
        }
    });

    let report = run(
        Options {
            input:       opt.input,
            pmt_pids:    opt.pmt_pids,
            follow_pat:  !opt.no_follow_pat,
            queue_depth: opt.queue_depth,
        },
        stop_rx,
    )
    .await?;

    info!("{} services, {} errors", report.services.len(), report.errors.len());
    println!("{}", Reporter::generate_json_report(&report));
    Ok(())
}
