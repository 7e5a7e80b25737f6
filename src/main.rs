use std::io::Read;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pipelab::adapters::ResultHandler;
use pipelab::cli::{format_dry_run, format_results, Args};
use pipelab::config::{
    add_cache, add_output, add_processor, lint_config, load_config_file, normalise,
};
use pipelab::runtime::StreamError;
use pipelab::{split_batches, Lab, NoticeLevel, OutputUnit};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    // Load and validate config
    let (mut text, mut config) = load_config_file(&args.config_file)
        .with_context(|| format!("Failed to load config file {}", args.config_file.display()))?;

    if args.has_edits() {
        for kind in &args.add_processor {
            add_processor(&mut config, kind)?;
        }
        for kind in &args.add_output {
            add_output(&mut config, kind)?;
        }
        for _ in 0..args.add_cache {
            let label = add_cache(&mut config);
            info!("Added cache resource '{}'", label);
        }
        text = normalise(&config)?;
    }

    if args.normalise {
        print!("{}", normalise(&config)?);
        return Ok(());
    }

    // Dry-run mode: print pipeline info and exit
    if args.dry_run {
        let lints = lint_config(&text)?;
        println!("{}", format_dry_run(&config, &args, &lints));
        return Ok(());
    }

    let input = read_input(&args)?;
    let units = split_batches(&input);
    if units.is_empty() {
        warn!("No input batches to run");
        return Ok(());
    }

    let (results_tx, mut results_rx) =
        mpsc::unbounded_channel::<(Vec<OutputUnit>, Option<StreamError>)>();
    let on_results: ResultHandler =
        Arc::new(move |outputs: Vec<OutputUnit>, err: Option<StreamError>| {
            let _ = results_tx.send((outputs, err));
        });

    let deadline = Duration::from_secs(args.timeout);
    let (lab, mut notices) = Lab::with_deadline(on_results, deadline);
    let notice_printer = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            if notice.level != NoticeLevel::Info {
                eprintln!("{}", notice);
            }
        }
    });

    let report = lab.compile(&text).await?;
    info!(
        "Running {} batches through {} feeds",
        units.len(),
        report.feeds
    );

    let expected = units.len() * report.feeds;
    lab.execute(units).await?.await?;

    // Every feed acknowledges every unit once; stop early if the session drains
    let mut received = 0;
    while received < expected {
        match tokio::time::timeout(deadline, results_rx.recv()).await {
            Ok(Some((outputs, err))) => {
                print!("{}", format_results(received, &outputs, err.as_ref()));
                received += 1;
                if matches!(err, Some(StreamError::Timeout(_))) {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => {
                lab.shutdown().await?;
                bail!(
                    "Timed out after {:?} waiting for results ({}/{})",
                    deadline,
                    received,
                    expected
                );
            }
        }
        if !lab.session().is_active().await {
            break;
        }
    }

    lab.shutdown().await?;
    drop(lab);
    if tokio::time::timeout(Duration::from_secs(1), notice_printer).await.is_err() {
        warn!("Notice printer did not finish");
    }

    if received < expected {
        bail!("Pipeline stopped after {} of {} results", received, expected);
    }
    Ok(())
}

fn read_input(args: &Args) -> Result<String> {
    match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read input from stdin")?;
            Ok(input)
        }
    }
}
