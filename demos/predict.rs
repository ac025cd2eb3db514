/*!
Predict the next price of a stock from Polygon tick data
*/

use anyhow::format_err;
use clap::{App, Arg};
use pricecast::data::{
    polygon::{read_ticks, POLYGON_DATETIME},
    FieldWindow, MarketData,
};
use pricecast::{DeviceSelector, ModelConfig, PredictorConfig, PricePredictor};
use std::fs::File;
use std::path::Path;
use tch::nn::VarStore;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_WINDOW: usize = 180;

/// Log to stderr, at a level set by `verbosity` unless `RUST_LOG` says otherwise
fn setup_logging(verbosity: usize) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok();
}

pub fn main() -> anyhow::Result<()> {
    let matches = App::new("pricecast")
        .version("0.1")
        .about("Predicts the next closing price of a stock with an LSTM-attention model")
        .arg(
            Arg::with_name("STOCK")
                .help("Input stock data in Polygon format")
                .required(true),
        )
        .arg(
            Arg::with_name("weights")
                .short("w")
                .long("weights")
                .help("Model parameters to load")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .help("JSON model configuration. Defaults to an input size of 7, one per tick field")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("device")
                .short("d")
                .long("device")
                .help("Device to use: cpu, cuda, cuda:N, mps, auto. Defaults to auto")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("window")
                .long("window")
                .help("Number of most recent ticks to feed the model")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("init")
                .long("init")
                .help("Write randomly initialised parameters to the weights file first"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Sets the level of verbosity")
                .takes_value(true),
        )
        .get_matches();

    let verbosity = matches
        .value_of("verbose")
        .map(|v| v.parse::<usize>())
        .unwrap_or(Ok(0))?;
    setup_logging(verbosity);

    let model = match matches.value_of("config") {
        Some(path) => ModelConfig::from_json_file(path)?,
        None => ModelConfig {
            input_size: 7,
            ..ModelConfig::default()
        },
    };
    let device: DeviceSelector = matches.value_of("device").unwrap_or("auto").parse()?;
    let window = matches
        .value_of("window")
        .map(|w| w.parse::<usize>())
        .unwrap_or(Ok(DEFAULT_WINDOW))?;
    let weights = matches.value_of("weights").expect("Required");
    let input = matches.value_of("STOCK").expect("Required");

    if matches.is_present("init") {
        let vs = VarStore::new(device.acquire()?);
        let fresh = PricePredictor::from_var_store(vs, &model, FieldWindow::ticks())?;
        fresh.save(weights)?;
        info!(weights, "wrote freshly initialised parameters");
    }

    let config = PredictorConfig {
        model,
        weights: weights.into(),
        device,
    };
    let predictor = PricePredictor::new(&config, FieldWindow::ticks().last(window))?;

    let ticks = read_ticks(File::open(Path::new(input))?, Some(POLYGON_DATETIME))?;
    if ticks.is_empty() {
        return Err(format_err!("could not read any ticks from file {}", input));
    }
    if ticks.len() < window {
        warn!(
            ticks = ticks.len(),
            window, "fewer ticks than the requested window, using all of them"
        );
    }
    let last = ticks[ticks.len() - 1];
    let prediction = predictor.predict_price(&MarketData::from(&ticks[..]))?;
    info!(last_close = last.c, prediction, "predicted");
    println!("{}", prediction);

    Ok(())
}
