use anyhow::Context;
use bucketkv_backend::{to_storage, Backend, ChangeEvent, KvPair};
use bytes::Bytes;
use colored::Colorize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::*;
use crate::settings::Settings;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_cli(&cli)?;
    debug!(?settings, "resolved settings");
    let backend = Backend::new(&settings.endpoints, settings.backend_config())
        .context("cannot create backend")?;
    let format = cli.format;

    match cli.command {
        Command::Get(args) => cmd_get(&backend, args, format).await,
        Command::Set(args) => cmd_set(&backend, args, format).await,
        Command::List(args) => cmd_list(&backend, args, format).await,
        Command::Watch(args) => cmd_watch(&backend, args, format).await,
    }
}

async fn cmd_get(backend: &Backend, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let tree = backend.get(&args.prefix).await?;
    match format {
        OutputFormat::Json => println!("{}", String::from_utf8_lossy(&tree)),
        OutputFormat::Text => {
            let value: Value = serde_json::from_slice(&tree)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

async fn cmd_set(backend: &Backend, args: SetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let value = match (&args.value, &args.file) {
        (_, Some(path)) => Bytes::from(
            std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?,
        ),
        (Some(value), None) => Bytes::from(value.clone()),
        (None, None) => anyhow::bail!("a value or --file is required"),
    };
    let key = if args.logical {
        to_storage(&args.key, &backend.config().root_path)
    } else {
        args.key
    };

    let size = value.len();
    backend.set(&key, value).await?;
    match format {
        OutputFormat::Json => println!("{}", json!({"key": key, "size": size})),
        OutputFormat::Text => println!("{} Wrote {} ({} bytes)", "✓".green().bold(), key.bold(), size),
    }
    Ok(())
}

async fn cmd_list(backend: &Backend, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let pairs = backend.list(&args.prefix).await?;
    match format {
        OutputFormat::Json => {
            let items: Vec<Value> = pairs.iter().map(pair_json).collect();
            println!("{}", Value::Array(items));
        }
        OutputFormat::Text => {
            if pairs.is_empty() {
                println!("No keys under {:?}.", args.prefix);
            }
            for pair in &pairs {
                println!("{}  {}", pair.key.yellow(), String::from_utf8_lossy(&pair.value));
            }
        }
    }
    Ok(())
}

async fn cmd_watch(backend: &Backend, args: WatchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut events = backend.watch(&args.key, cancel.clone());
    if format == OutputFormat::Text {
        eprintln!("Watching {:?}, press Ctrl-C to stop.", args.key);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event, format),
                None => break,
            },
        }
    }
    Ok(())
}

fn print_event(event: &ChangeEvent, format: OutputFormat) {
    match (format, event) {
        (OutputFormat::Json, ChangeEvent::ValueUpdated { key, value }) => println!(
            "{}",
            json!({"event": "updated", "key": key, "value": String::from_utf8_lossy(value)})
        ),
        (OutputFormat::Json, ChangeEvent::Error(e)) => {
            println!("{}", json!({"event": "error", "error": e.to_string()}))
        }
        (OutputFormat::Text, ChangeEvent::ValueUpdated { key, value }) => println!(
            "{} {}  {}",
            "updated".green(),
            key.yellow(),
            String::from_utf8_lossy(value)
        ),
        (OutputFormat::Text, ChangeEvent::Error(e)) => println!("{} {}", "error".red().bold(), e),
    }
}

fn pair_json(pair: &KvPair) -> Value {
    json!({"key": pair.key, "value": String::from_utf8_lossy(&pair.value)})
}
