#![cfg(not(tarpaulin_include))]

use clap::{Parser, Subcommand};
use maintenance::app::AppState;
use maintenance::backend::Backend;
use maintenance::config::Config;
use maintenance::downloader;
use maintenance::eligibility::{
    AvailableOptions, MaintenanceOption, Selection, SubmittedKeys, available_options, is_open,
};
use maintenance::model::{Project, catalog_from};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Parser)]
#[command(name = "maintenance-cli", about = "Inspect and export seasonal maintenance data")]
struct Cli {
    /// Directory of the local store
    #[arg(long, env = "MAINTENANCE_DATA_DIR", default_value = "data", global = true)]
    data_dir: PathBuf,

    #[arg(long, env = "SUPABASE_URL", global = true)]
    supabase_url: Option<String>,

    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true, global = true)]
    supabase_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report which backend the settings select
    Check,
    /// Print the choices still open for a selection
    Options {
        project: i64,
        #[arg(long)]
        floor: Option<String>,
        #[arg(long)]
        thing: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },
    /// Walk through floor, thing and location interactively
    Pick { project: i64 },
    /// Write the seasonal workbook of a project
    Export {
        project: i64,
        /// Output file; defaults to the workbook's own name
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::local(&self.data_dir);
        config.supabase_url = self.supabase_url.clone();
        config.supabase_key = self.supabase_key.clone();
        config.with_vite_fallbacks()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let config = cli.config();

    if let Command::Check = cli.command {
        match config.validate() {
            Ok(choice) => println!("ok: {:?}", choice),
            Err(e) => println!("invalid configuration: {}", e),
        }
        return Ok(());
    }

    let state = AppState::from_config(config)?;
    let backend = state.backend.as_ref();

    match cli.command {
        Command::Check => {}
        Command::Options {
            project,
            floor,
            thing,
            location,
        } => {
            let project = find_project(backend, project).await?;
            let (catalog, submitted) = load_inputs(backend, &project).await?;
            let mut selection = Selection::new();
            selection.select_floor(floor);
            selection.select_thing(thing);
            selection.select_location(location);
            print_options(&available_options(&catalog, &submitted, &selection));
        }
        Command::Pick { project } => {
            let project = find_project(backend, project).await?;
            let (catalog, submitted) = load_inputs(backend, &project).await?;
            pick(&catalog, &submitted)?;
        }
        Command::Export { project, out } => {
            let project = find_project(backend, project).await?;
            let started = Instant::now();
            let export = downloader::export_project(backend, &project).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(&export.file_name));
            std::fs::write(&out, &export.bytes)?;
            println!(
                "wrote {} ({} bytes) in {:.1}s",
                out.display(),
                export.bytes.len(),
                started.elapsed().as_secs_f64()
            );
        }
    }

    Ok(())
}

async fn find_project(
    backend: &dyn Backend,
    id: i64,
) -> Result<Project, Box<dyn std::error::Error>> {
    backend
        .get_project(id)
        .await?
        .ok_or_else(|| format!("project {} not found", id).into())
}

async fn load_inputs(
    backend: &dyn Backend,
    project: &Project,
) -> Result<(Vec<MaintenanceOption>, SubmittedKeys), Box<dyn std::error::Error>> {
    let records = backend.records_for_project(&project.name).await?;
    let photos = backend.photos_for_project(&project.name).await?;
    let submitted = SubmittedKeys::from_options(&catalog_from(&photos));
    Ok((catalog_from(&records), submitted))
}

fn print_options(options: &AvailableOptions) {
    println!("floors:    {}", options.floors.join(", "));
    println!("things:    {}", options.things.join(", "));
    println!("locations: {}", options.locations.join(", "));
}

fn pick(
    catalog: &[MaintenanceOption],
    submitted: &SubmittedKeys,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut selection = Selection::new();
    let mut status = String::from("ok");
    let mut start_time = Instant::now();

    loop {
        print_options(&available_options(catalog, submitted, &selection));
        print!(
            "[{:.1}] ({}) > ",
            start_time.elapsed().as_secs_f64(),
            status
        );
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command)? == 0 {
            break;
        }
        let command = command.trim();
        start_time = Instant::now();

        let (verb, value) = match command.split_once(' ') {
            Some((verb, value)) => (verb, Some(value.trim().to_string())),
            None => (command, None),
        };

        status = match verb {
            "q" => break,
            "help" => {
                println!("Commands:");
                println!("  floor <name>     Choose a floor (clears thing and location)");
                println!("  thing <name>     Choose a thing (clears location)");
                println!("  location <name>  Choose a location");
                println!("  clear            Start over");
                println!("  q                Quit");
                String::from("ok")
            }
            "floor" => {
                selection.select_floor(value);
                String::from("ok")
            }
            "thing" => {
                selection.select_thing(value);
                String::from("ok")
            }
            "location" => {
                selection.select_location(value);
                match (&selection.floor, &selection.thing, &selection.location) {
                    (Some(f), Some(t), Some(l)) if is_open(catalog, submitted, f, t, l) => {
                        String::from("open")
                    }
                    _ => String::from("not open"),
                }
            }
            "clear" => {
                selection = Selection::new();
                String::from("ok")
            }
            _ => String::from("invalid command"),
        };
    }

    Ok(())
}
