use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facefuse::{
    api, batch, compare, config, predict, search, EmbeddingProvider, Pipeline, ServiceContext,
};
use log::{info, warn};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "facefuse")]
#[command(
    version,
    about = "Two-model ensemble face identification over pre-built similarity indices"
)]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve,
    /// Identify every face in an image file
    Identify {
        image: PathBuf,
        #[arg(short, long, default_value_t = 0.5)]
        threshold: f32,
        #[arg(short, long, default_value_t = 3)]
        results: usize,
    },
    /// Compare two people by name
    Compare { person1: String, person2: String },
    /// Compare one person against a comma separated list of names
    CompareMany {
        target: String,
        people: String,
        #[arg(short, long, default_value_t = 0.0)]
        tolerance: f32,
    },
    /// List the people most similar to a known person
    Closest {
        name: String,
        #[arg(short, long, default_value_t = 10)]
        results: usize,
        #[arg(short, long)]
        tolerance: Option<f32>,
        #[arg(long, default_value_t = 1.0)]
        arc_weight: f32,
        #[arg(long, default_value_t = 1.0)]
        facenet_weight: f32,
    },
    /// Print every known person name
    Names,
    /// Write the effective configuration to the config path
    InitConfig,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::InitConfig => {
            config::save_config(&cfg, cli.config.as_deref())?;
            info!("✓ Config written");
            Ok(())
        }
        Commands::Serve => serve(&cfg),
        Commands::Identify {
            image,
            threshold,
            results,
        } => {
            let ctx = ServiceContext::load(&cfg)?;
            let mut pipeline = load_pipeline(&cfg)?;
            let img = image::open(&image)
                .with_context(|| format!("opening {}", image.display()))?;
            let faces = predict::predict_all_faces(&ctx, &mut pipeline, &img, threshold, results)?;
            print_json(&faces)
        }
        Commands::Compare { person1, person2 } => {
            let ctx = ServiceContext::load(&cfg)?;
            print_json(&compare::compare_two_faces(&ctx, &person1, &person2)?)
        }
        Commands::CompareMany {
            target,
            people,
            tolerance,
        } => {
            let ctx = ServiceContext::load(&cfg)?;
            print_json(&batch::batch_one_to_many(&ctx, &target, &people, tolerance)?)
        }
        Commands::Closest {
            name,
            results,
            tolerance,
            arc_weight,
            facenet_weight,
        } => {
            let ctx = ServiceContext::load(&cfg)?;
            let req = search::SearchRequest {
                name,
                num_results: results,
                tolerance: tolerance.unwrap_or(cfg.search.tolerance),
                weights: config::ModelWeights::new(arc_weight, facenet_weight),
            };
            print_json(&search::find_closest_faces(&ctx, &req)?)
        }
        Commands::Names => {
            let ctx = ServiceContext::load(&cfg)?;
            for name in ctx.registry.names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn load_pipeline(cfg: &config::Config) -> Result<Pipeline> {
    let models = &cfg.models;
    let mut pipeline = Pipeline::new(&models.detector, &models.arcface, &models.facenet)
        .context("Failed to initialize face recognition pipeline")?;
    pipeline.nms_threshold = models.nms_threshold;
    Ok(pipeline)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn serve(cfg: &config::Config) -> Result<()> {
    let ctx = Arc::new(ServiceContext::load(cfg)?);
    info!("Loaded {} face vectors", ctx.population());

    let provider: Option<api::SharedProvider> = match load_pipeline(cfg) {
        Ok(pipeline) => {
            let shared: Arc<Mutex<dyn EmbeddingProvider>> = Arc::new(Mutex::new(pipeline));
            Some(shared)
        }
        Err(e) => {
            warn!("Prediction endpoints disabled: {e:#}");
            None
        }
    };

    let app = api::build_router(api::AppState::new(ctx, provider));
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!("Listening on http://{addr}");
        axum::serve(listener, app).await.context("serving HTTP")
    })
}
