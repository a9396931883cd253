use std::{fs, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use compact_str::CompactString;
use rrdkit::hub;
use rrdkit_common::{
    backend::FileBackend,
    rrd::{
        definition::{ArchiveSpec, ConsolidationFunction, DataSourceSpec},
        RrdDefinition, RrdDump,
    },
    Timestamp,
};

/// Round-robin archive tool.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the archive sets.
    #[arg(short, long, default_value = ".")]
    directory: PathBuf,

    /// Logging level
    #[arg(long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an archive set from DS:... and RRA:... definitions.
    Create {
        name: String,

        /// Time of the first (virtual) update, defaults to 10 seconds ago.
        #[arg(short = 'b', long)]
        start: Option<Timestamp>,

        /// Seconds between primary data points.
        #[arg(short, long, default_value_t = 300)]
        step: u64,

        #[arg(required = true)]
        definitions: Vec<String>,
    },
    /// Apply time:value[:value...] samples (time may be N).
    Update {
        name: String,

        /// Data sources the values are for, separated by ':'.
        #[arg(short, long)]
        template: Option<String>,

        #[arg(required = true)]
        samples: Vec<String>,
    },
    /// Read consolidated values.
    Fetch {
        name: String,

        cf: ConsolidationFunction,

        /// Defaults to one day before end.
        #[arg(short, long)]
        start: Option<Timestamp>,

        /// Defaults to now.
        #[arg(short, long)]
        end: Option<Timestamp>,

        /// Preferred seconds per row.
        #[arg(short, long)]
        resolution: Option<u64>,

        /// Print the result as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print archive set state.
    Info { name: String },
    /// Print the whole archive set as JSON.
    Dump { name: String },
    /// Create an archive set from a JSON dump.
    Restore { name: String, path: PathBuf },
    Delete { name: String },
    List,
}

fn parse_definition(
    definitions: &[String],
    start: Timestamp,
    step: u64,
) -> anyhow::Result<RrdDefinition> {
    let mut definition = RrdDefinition::new(start, step);

    for token in definitions {
        if token.starts_with("DS:") {
            definition = definition.data_source(token.parse::<DataSourceSpec>()?);
        } else if token.starts_with("RRA:") {
            definition = definition.archive(token.parse::<ArchiveSpec>()?);
        } else {
            anyhow::bail!("'{token}' is neither a DS: nor a RRA: definition");
        }
    }

    Ok(definition)
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.10e}"),
        None => "nan".into(),
    }
}

async fn execute(hub: &hub::ArchiveHub, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Create {
            name,
            start,
            step,
            definitions,
        } => {
            let start = start.unwrap_or_else(|| rrdkit_common::now().saturating_sub(10));
            hub.create(&name, parse_definition(&definitions, start, step)?)?;
        }
        Command::Update {
            name,
            template,
            samples,
        } => {
            let handle = hub.open(&name)?;

            for sample in &samples {
                handle.buffer_value(sample, [] as [&str; 0])?;
            }

            let template: Option<Vec<CompactString>> =
                template.map(|template| template.split(':').map(CompactString::from).collect());

            let count = handle.flush(template).await?;
            tracing::info!("{name}: {count} samples applied");
        }
        Command::Fetch {
            name,
            cf,
            start,
            end,
            resolution,
            json,
        } => {
            let end = end.unwrap_or_else(rrdkit_common::now);
            let start = start.unwrap_or_else(|| end.saturating_sub(86400));

            let result = hub.open(&name)?.fetch(cf, start, end, resolution).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let header: Vec<&str> = result.series.keys().map(|name| name.as_str()).collect();
                println!("{:>10} {}", "", header.join(" "));

                for (timestamp, values) in result.by_time() {
                    let values: Vec<String> = values.values().copied().map(format_value).collect();
                    println!("{timestamp}: {}", values.join(" "));
                }
            }
        }
        Command::Info { name } => {
            for (key, value) in hub.open(&name)?.info().await? {
                println!("{key} = {value}");
            }
        }
        Command::Dump { name } => {
            let dump = hub.open(&name)?.dump().await?;
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        Command::Restore { name, path } => {
            let raw = fs::read(&path).with_context(|| format!("reading {path:?}"))?;
            let dump: RrdDump = serde_json::from_slice(&raw)?;

            hub.restore(&name, dump)?;
        }
        Command::Delete { name } => hub.delete(&name).await?,
        Command::List => hub.stored()?.iter().for_each(|name| println!("{name}")),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let text_subscriber = tracing_subscriber::fmt()
        .with_ansi(true)
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(text_subscriber)?;

    let backend = FileBackend::new(&args.directory)
        .with_context(|| format!("opening {:?}", args.directory))?;
    let hub = hub::ArchiveHub::new(Arc::new(backend));

    let result = execute(&hub, args.command).await;
    hub.shutdown().await;

    result
}
