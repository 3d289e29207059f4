use std::env;

use anyhow::{Context, Result, bail};
use log::info;
use orchestrator::{configs::Config, data::InMemoryDataset};

const USAGE: &str = "usage: rasgan-gp <config.json> <dataset.safetensors>";

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [config_path, data_path] = args.as_slice() else {
        bail!(USAGE);
    };

    let config = Config::load(config_path)
        .with_context(|| format!("failed to read config {config_path}"))?;

    let mut data = InMemoryDataset::load(data_path, config.training.batch_size)
        .with_context(|| format!("failed to load dataset {data_path}"))?;
    if config.training.shuffle {
        data = data.shuffled(config.model.seed);
    }

    info!(images = data.len(); "dataset {data_path} loaded");
    let report = orchestrator::train(config, Box::new(data))?;

    for (i, (discriminator, generator)) in report.losses.pairs().into_iter().enumerate() {
        println!("{i}\t{discriminator:.6}\t{generator:.6}");
    }

    info!(
        steps = report.steps,
        generator_updates = report.generator_updates;
        "done"
    );
    Ok(())
}
