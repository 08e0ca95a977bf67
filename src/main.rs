#![deny(
    warnings,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::Write;
use workout_relay::{
    Inbox, StagingDirs, StagingStore, TransferMetadata, cli, codec, envelope, gpx,
    types::WorkoutPayload, utils,
};

#[macro_use]
extern crate workout_relay;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    utils::init_logging(cli.verbose, cli.quiet);

    let dirs = StagingDirs::new(&cli.staging_dir);
    dlog!("staging_root={}", dirs.root().display());

    match cli.cmd {
        cli::Cmd::Stage { payload } => {
            let bytes = std::fs::read(&payload)
                .with_context(|| format!("reading payload: {}", payload.display()))?;
            let p = codec::decode(&bytes)
                .with_context(|| format!("decoding payload: {}", payload.display()))?;
            stage(&dirs, &p)
        }
        cli::Cmd::ImportGpx { gpx: track, sport } => {
            let p = gpx::payload_from_gpx(&track, sport)?;
            stage(&dirs, &p)
        }
        cli::Cmd::Receive { file, envelope } => {
            let meta = envelope
                .as_deref()
                .map(serde_json::from_str::<TransferMetadata>)
                .transpose()
                .context("parsing envelope JSON")?;

            let incoming = open_store(dirs.incoming())?;
            let (p, location) = incoming
                .accept(&file, meta.as_ref())
                .with_context(|| format!("accepting delivered file: {}", file.display()))?;
            tracing::info!(id = %p.id, path = %location.display(), "received workout");
            println!("{}", location.display());
            Ok(())
        }
        cli::Cmd::Inbox { count, details } => {
            let inbox = Inbox::new(open_store(dirs.incoming())?);
            let report = inbox.reload().context("reloading inbox")?;
            dlog!(
                "inbox loaded={} skipped={} duplicates={}",
                report.loaded,
                report.skipped,
                report.duplicates
            );

            let snapshot = inbox.snapshot();
            if snapshot.is_empty() {
                bail!(
                    "No workouts in {}. Receive some files first.",
                    inbox.store().dir().display()
                );
            }

            for (i, p) in snapshot.iter().take(count).enumerate() {
                let dur_str = utils::format_duration(p.duration);
                if details {
                    let start_s = p.start.to_rfc3339();
                    let dist = utils::format_distance(p.distance_meters);
                    let sport = p.sport.as_deref().unwrap_or("-");
                    println!("{}\t{start_s}\t{dur_str}\t{dist}\t{sport}\t{}", i + 1, p.id);
                } else {
                    println!("{}\t{dur_str}", p.start.to_rfc3339());
                }
            }
            Ok(())
        }
        cli::Cmd::Show { id } => {
            let inbox = Inbox::new(open_store(dirs.incoming())?);
            inbox.reload().context("reloading inbox")?;
            let Some(p) = inbox.get(id) else {
                bail!("No workout with id {id} in the inbox.");
            };
            let json = codec::encode_pretty(&p).context("encoding payload")?;
            let mut out = std::io::stdout().lock();
            out.write_all(&json)?;
            writeln!(out)?;
            Ok(())
        }
    }
}

fn open_store(dir: std::path::PathBuf) -> Result<StagingStore> {
    let display = dir.display().to_string();
    StagingStore::open(dir).with_context(|| format!("opening staging dir: {display}"))
}

fn stage(dirs: &StagingDirs, p: &WorkoutPayload) -> Result<()> {
    for issue in p.validate() {
        tracing::warn!(id = %p.id, %issue, "payload failed a structural check");
    }

    let outgoing = open_store(dirs.outgoing())?;
    let location = outgoing.write(p).context("staging payload")?;
    let meta = envelope::make_metadata(p);

    println!("{}", location.display());
    println!(
        "{}",
        serde_json::to_string(&meta).context("encoding envelope")?
    );
    Ok(())
}
