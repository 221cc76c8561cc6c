use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

/// Invocation parameters for the external inference worker.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub program: PathBuf,
    pub model_path: PathBuf,
    pub tmp_dir: PathBuf,
}

/// Admission policy for the dispatcher.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub worker: WorkerConfig,
    pub max_concurrent: usize,
    pub max_queue_depth: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub listen: String,
    pub dispatcher: DispatcherConfig,
    pub verbose: bool,
}

#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub server: String,
    pub source: PathBuf,
    pub interval_ms: u64,
    pub jpeg_quality: u8,
    pub fps: f64,
    pub startup_timeout_ms: u64,
    pub classes: Option<Vec<String>>,
    pub verbose: bool,
}

const SERVE_USAGE: &str = "Usage: ppe-sentinel serve --worker <path> --model <path> \
[--listen <addr:port>] [--max-concurrent <n>] [--queue-cap <n>] [--tmp-dir <path>] \
[--verbose]\n\nPositional form is also supported: serve <worker-path> <model-path> [...flags...]";

const WATCH_USAGE: &str = "Usage: ppe-sentinel watch --source <dir> [--server <url>] \
[--interval-ms <n>] [--jpeg-quality <1-100>] [--fps <n>] [--startup-timeout-ms <n>] \
[--classes <a,b,c>] [--verbose]\n\nPositional form is also supported: watch <source-dir> [...flags...]";

impl ServeConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 3 {
            bail!(SERVE_USAGE);
        }

        let mut worker: Option<PathBuf> = None;
        let mut model: Option<PathBuf> = None;
        let mut listen: Option<String> = None;
        let mut max_concurrent: Option<usize> = None;
        let mut queue_cap: Option<usize> = None;
        let mut tmp_dir: Option<PathBuf> = None;
        let mut verbose = false;
        let mut positional: Vec<String> = Vec::new();

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--worker" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--worker requires a value"))?;
                    worker = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--model" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--model requires a value"))?;
                    model = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--listen" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--listen requires a value"))?;
                    listen = Some(value.clone());
                    idx += 1;
                }
                "--max-concurrent" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--max-concurrent requires a value"))?
                        .parse::<usize>()
                        .with_context(|| "--max-concurrent must be a positive integer".to_string())?;
                    if value == 0 {
                        bail!("--max-concurrent must be at least 1");
                    }
                    max_concurrent = Some(value);
                    idx += 1;
                }
                "--queue-cap" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--queue-cap requires a value"))?
                        .parse::<usize>()
                        .with_context(|| "--queue-cap must be a positive integer".to_string())?;
                    if value == 0 {
                        bail!("--queue-cap must be at least 1");
                    }
                    queue_cap = Some(value);
                    idx += 1;
                }
                "--tmp-dir" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--tmp-dir requires a value"))?;
                    tmp_dir = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--verbose" => {
                    verbose = true;
                    idx += 1;
                }
                arg if arg.starts_with('-') => {
                    bail!("Unrecognised flag: {arg}");
                }
                other => {
                    positional.push(other.to_string());
                    idx += 1;
                }
            }
        }

        let mut positional = positional.into_iter();
        if worker.is_none() {
            worker = positional.next().map(PathBuf::from);
        }
        if model.is_none() {
            model = positional.next().map(PathBuf::from);
        }

        let worker = worker.ok_or_else(|| {
            anyhow!("Missing worker executable. Provide --worker <path> or positional <worker-path>.")
        })?;
        let model = model.ok_or_else(|| {
            anyhow!("Missing model artifact. Provide --model <path> or positional <model-path>.")
        })?;

        Ok(Self {
            listen: listen.unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            dispatcher: DispatcherConfig {
                worker: WorkerConfig {
                    program: worker,
                    model_path: model,
                    tmp_dir: tmp_dir.unwrap_or_else(std::env::temp_dir),
                },
                max_concurrent: max_concurrent.unwrap_or(2),
                max_queue_depth: queue_cap,
            },
            verbose,
        })
    }
}

impl WatchConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 3 {
            bail!(WATCH_USAGE);
        }

        let mut server: Option<String> = None;
        let mut source: Option<PathBuf> = None;
        let mut interval_ms: Option<u64> = None;
        let mut jpeg_quality: Option<u8> = None;
        let mut fps: Option<f64> = None;
        let mut startup_timeout_ms: Option<u64> = None;
        let mut classes: Option<Vec<String>> = None;
        let mut verbose = false;
        let mut positional: Vec<String> = Vec::new();

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--server" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--server requires a value"))?;
                    server = Some(value.clone());
                    idx += 1;
                }
                "--source" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--source requires a value"))?;
                    source = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--interval-ms" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--interval-ms requires a value"))?
                        .parse::<u64>()
                        .with_context(|| "--interval-ms must be an integer".to_string())?;
                    interval_ms = Some(value);
                    idx += 1;
                }
                "--jpeg-quality" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--jpeg-quality requires a value"))?
                        .parse::<u8>()
                        .with_context(|| {
                            "--jpeg-quality must be an integer between 1 and 100".to_string()
                        })?;
                    if !(1..=100).contains(&value) {
                        bail!("--jpeg-quality must be an integer between 1 and 100");
                    }
                    jpeg_quality = Some(value);
                    idx += 1;
                }
                "--fps" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--fps requires a value"))?
                        .parse::<f64>()
                        .with_context(|| "--fps must be a number".to_string())?;
                    if value <= 0.0 {
                        bail!("--fps must be positive");
                    }
                    fps = Some(value);
                    idx += 1;
                }
                "--startup-timeout-ms" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--startup-timeout-ms requires a value"))?
                        .parse::<u64>()
                        .with_context(|| "--startup-timeout-ms must be an integer".to_string())?;
                    startup_timeout_ms = Some(value);
                    idx += 1;
                }
                "--classes" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--classes requires a value"))?;
                    classes = Some(
                        value
                            .split(',')
                            .map(|name| name.trim().to_string())
                            .filter(|name| !name.is_empty())
                            .collect(),
                    );
                    idx += 1;
                }
                "--verbose" => {
                    verbose = true;
                    idx += 1;
                }
                arg if arg.starts_with('-') => {
                    bail!("Unrecognised flag: {arg}");
                }
                other => {
                    positional.push(other.to_string());
                    idx += 1;
                }
            }
        }

        let mut positional = positional.into_iter();
        if source.is_none() {
            source = positional.next().map(PathBuf::from);
        }

        let source = source.ok_or_else(|| {
            anyhow!("Missing frame source. Provide --source <dir> or positional <source-dir>.")
        })?;

        Ok(Self {
            server: server.unwrap_or_else(|| "http://127.0.0.1:8080".to_string()),
            source,
            interval_ms: interval_ms.unwrap_or(300),
            jpeg_quality: jpeg_quality.unwrap_or(85),
            fps: fps.unwrap_or(30.0),
            startup_timeout_ms: startup_timeout_ms.unwrap_or(3_000),
            classes,
            verbose,
        })
    }
}
