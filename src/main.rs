use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use health_reminder_lib::{
    config, flags,
    jobs::Job,
    model::Collection,
    Service,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "health-reminder-jobs", version, about = "Caffeine and hydration reminder jobs")]
struct Cli {
    /// Directory holding config.toml; relative db/log paths resolve against it.
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduled jobs and the flag controller (default).
    Serve,
    /// Run one job once and print its report.
    Check {
        #[arg(value_enum)]
        job: JobArg,
    },
    /// Merge JSON fields into a document, creating it if needed.
    Put {
        collection: Collection,
        key:        String,
        /// A JSON object, e.g. '{"currentIntake": 750}'
        fields:     String,
    },
    /// Print a document as JSON.
    Get {
        collection: Collection,
        key:        String,
    },
    /// Write a default config.toml into the config dir.
    Init,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum JobArg {
    Caffeine,
    Hydration,
}

impl From<JobArg> for Job {
    fn from(arg: JobArg) -> Self {
        match arg {
            JobArg::Caffeine  => Job::Caffeine,
            JobArg::Hydration => Job::Hydration,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load_or_default(&cli.config_dir)?;
    cfg.resolve_paths(&cli.config_dir);
    let _log_guard = health_reminder_lib::logging::init(&cfg.log_dir)?;

    let mut service = Service::open(cfg).context("opening document store")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => return service.serve().await,

        Command::Check { job } => {
            let now = service.config.now();
            let report = service.evaluator.run(job.into(), now).await?;
            // Apply resets for anything written during the run before exiting.
            flags::drain(service.store.as_ref(), &mut service.events).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Put { collection, key, fields } => {
            let value: serde_json::Value = serde_json::from_str(&fields).context("parsing fields")?;
            let serde_json::Value::Object(fields) = value else {
                bail!("fields must be a JSON object");
            };
            service.store.upsert(collection, &key, fields).await?;
            let resets = flags::drain(service.store.as_ref(), &mut service.events).await?;
            tracing::info!("Wrote {}/{} ({} flag reset(s))", collection, key, resets);
        }

        Command::Get { collection, key } => match service.store.get(collection, &key).await? {
            Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
            None => bail!("{}/{} not found", collection, key),
        },

        Command::Init => {
            let path = cli.config_dir.join(config::CONFIG_FILE);
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            config::save(&config::AppConfig::default(), &cli.config_dir)?;
            tracing::info!("Wrote default config to {}", path.display());
        }
    }

    service.sqlite.shutdown();
    Ok(())
}
