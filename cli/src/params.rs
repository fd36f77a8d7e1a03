use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, bail};
use clap::ArgMatches;
use graphbench_libcli::{BenchLimits, ChannelOrder, PreprocessConfig};

/// Structure holding the parsed parameters.
#[derive(Clone, Debug)]
pub struct Parameters {
    pub model: PathBuf,
    pub weights: Option<PathBuf>,
    pub format: String,
    pub model_name: String,
    pub image: Option<PathBuf>,
    pub labels: Option<PathBuf>,
    pub limits: BenchLimits,
    pub top_k: usize,
    pub preprocess: PreprocessConfig,
    pub json: bool,
}

fn parsed<T>(matches: &ArgMatches, name: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = matches.value_of(name).with_context(|| format!("missing --{name}"))?;
    raw.parse::<T>().with_context(|| format!("invalid value {raw:?} for {name}"))
}

fn parse_mean(raw: &str) -> anyhow::Result<[f32; 3]> {
    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<Result<Vec<f32>, _>>()
        .with_context(|| format!("invalid mean {raw:?}"))?;
    match values.as_slice() {
        &[a, b, c] => Ok([a, b, c]),
        _ => bail!("mean {raw:?} must hold exactly three comma-separated values"),
    }
}

impl Parameters {
    pub fn from_clap(matches: &ArgMatches) -> anyhow::Result<Parameters> {
        let model = matches.value_of("model").map(PathBuf::from).context("missing --model")?;
        let limits = BenchLimits {
            warmup_loops: parsed(matches, "warmup")?,
            repeat: parsed(matches, "repeat")?,
        };
        if limits.repeat == 0 {
            bail!("repeat count must be at least 1");
        }
        let preprocess = PreprocessConfig {
            height: parsed(matches, "height")?,
            width: parsed(matches, "width")?,
            mean: parse_mean(matches.value_of("mean").unwrap_or_default())?,
            scale: parsed(matches, "scale")?,
            channel_order: if matches.is_present("rgb") {
                ChannelOrder::Rgb
            } else {
                ChannelOrder::Bgr
            },
        };
        let params = Parameters {
            model,
            weights: matches.value_of("weights").map(PathBuf::from),
            format: matches.value_of("format").unwrap_or("onnx").to_string(),
            model_name: matches.value_of("model_name").unwrap_or("mobilenet").to_string(),
            image: matches.value_of("image").map(PathBuf::from),
            labels: matches.value_of("labels").map(PathBuf::from),
            limits,
            top_k: parsed(matches, "top_k")?,
            preprocess,
            json: matches.is_present("json"),
        };
        debug!("{params:?}");
        Ok(params)
    }
}
