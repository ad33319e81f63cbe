//! Reference CLI for the reservoir-computing core (spec §6.5).
//!
//! ```text
//! eonctl birth   --seed K --size N [--input I] [--output O] --out SNAP
//! eonctl train   --data F --out SNAP [--seed K] [--size N] [--washout W]
//! eonctl predict --in SNAP --u V
//! eonctl inspect --in SNAP
//! ```
//!
//! Exit codes: 0 ok, 1 other, 2 config error, 3 data error, 4 numeric error.

use eon_core::config::Config;
use eon_core::core::Core;
use eon_core::error::CoreError;
use eon_core::learner::DenseCorrelation;
use eon_core::reservoir::Reservoir;
use std::env;
use std::fs;
use std::process::ExitCode;

type DefaultCore = Core<Reservoir, DenseCorrelation>;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::from(1);
    }

    let result = match args[1].as_str() {
        "birth" => cmd_birth(&args[2..]),
        "train" => cmd_train(&args[2..]),
        "predict" => cmd_predict(&args[2..]),
        "inspect" => cmd_inspect(&args[2..]),
        "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(CliError::Config(format!("unknown subcommand: {other}"))),
    };

    match result {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

enum CliError {
    Config(String),
    Data(String),
    Numeric(String),
    Other(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(s) | Self::Data(s) | Self::Numeric(s) | Self::Other(s) => write!(f, "{s}"),
        }
    }
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Data(_) => 3,
            Self::Numeric(_) => 4,
            Self::Other(_) => 1,
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConfigError(_) | CoreError::ConfigMismatch(_) => {
                CliError::Config(err.to_string())
            }
            CoreError::DimensionMismatch { .. }
            | CoreError::InsufficientData { .. }
            | CoreError::SnapshotCorrupt(_)
            | CoreError::CodecError(_) => CliError::Data(err.to_string()),
            CoreError::NumericInstability(_) => CliError::Numeric(err.to_string()),
            CoreError::Cancelled => CliError::Other(err.to_string()),
        }
    }
}

struct Flags {
    values: std::collections::HashMap<String, String>,
}

impl Flags {
    fn parse(args: &[String]) -> Self {
        let mut values = std::collections::HashMap::new();
        let mut i = 0;
        while i < args.len() {
            if let Some(key) = args[i].strip_prefix("--") {
                let value = args.get(i + 1).cloned().unwrap_or_default();
                values.insert(key.to_string(), value);
                i += 2;
            } else {
                i += 1;
            }
        }
        Self { values }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    fn required(&self, key: &str) -> Result<&str, CliError> {
        self.get(key)
            .ok_or_else(|| CliError::Config(format!("missing required flag --{key}")))
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, CliError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| CliError::Config(format!("invalid value for --{key}: {v}"))),
        }
    }
}

fn now_unix_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn cmd_birth(args: &[String]) -> Result<(), CliError> {
    let flags = Flags::parse(args);
    let seed: u32 = flags.parse_or("seed", 42)?;
    let size: usize = flags.parse_or("size", 100)?;
    let input_size: usize = flags.parse_or("input", 1)?;
    let output_size: usize = flags.parse_or("output", 1)?;
    let out = flags.required("out")?;

    let config = Config {
        reservoir_size: size,
        input_size,
        output_size,
        ..Config::default()
    };
    config.validate().map_err(CliError::from)?;

    let correlation = DenseCorrelation::new(size, 1e-2);
    let core = DefaultCore::construct(config, seed, now_unix_seconds(), correlation)
        .map_err(CliError::from)?;

    fs::write(out, core.snapshot())
        .map_err(|e| CliError::Other(format!("writing snapshot: {e}")))?;
    println!("birthed core at {out} ({size} units, seed {seed})");
    Ok(())
}

fn cmd_train(args: &[String]) -> Result<(), CliError> {
    let flags = Flags::parse(args);
    let data_path = flags.required("data")?;
    let out = flags.required("out")?;
    let seed: u32 = flags.parse_or("seed", 42)?;
    let size: usize = flags.parse_or("size", 100)?;

    let contents = fs::read_to_string(data_path)
        .map_err(|e| CliError::Data(format!("reading {data_path}: {e}")))?;
    let (inputs, targets) = parse_training_data(&contents)?;

    let input_size = inputs.first().map(|v| v.len()).unwrap_or(1);
    let output_size = targets.first().map(|v| v.len()).unwrap_or(1);
    let washout: usize = flags.parse_or("washout", 50.max(size / 2))?;

    let config = Config {
        reservoir_size: size,
        input_size,
        output_size,
        ..Config::default()
    };
    config.validate().map_err(CliError::from)?;

    let correlation = DenseCorrelation::new(size, 1e-2);
    let mut core = DefaultCore::construct(config, seed, now_unix_seconds(), correlation)
        .map_err(CliError::from)?;

    let mse = core
        .train(&inputs, &targets, washout, None)
        .map_err(CliError::from)?;

    fs::write(out, core.snapshot())
        .map_err(|e| CliError::Other(format!("writing snapshot: {e}")))?;
    println!("trained on {} samples, mse={mse:.6}, wrote {out}", inputs.len());
    Ok(())
}

fn cmd_predict(args: &[String]) -> Result<(), CliError> {
    let flags = Flags::parse(args);
    let snap_path = flags.required("in")?;
    let u_arg = flags.required("u")?;

    let bytes =
        fs::read(snap_path).map_err(|e| CliError::Data(format!("reading {snap_path}: {e}")))?;
    let mut core = DefaultCore::restore(&bytes).map_err(CliError::from)?;

    let u: Vec<f32> = parse_float_list(u_arg)?;
    core.update(&u).map_err(CliError::from)?;
    let y = core.predict();

    let rendered: Vec<String> = y.iter().map(|v| format!("{v:.6}")).collect();
    println!("{}", rendered.join(","));
    Ok(())
}

fn cmd_inspect(args: &[String]) -> Result<(), CliError> {
    let flags = Flags::parse(args);
    let snap_path = flags.required("in")?;

    let bytes =
        fs::read(snap_path).map_err(|e| CliError::Data(format!("reading {snap_path}: {e}")))?;
    let core = DefaultCore::restore(&bytes).map_err(CliError::from)?;

    let birth = core.birth_certificate();
    let config = core.config();
    println!("birth_time:      {}", birth.birth_time);
    println!("seed:            {}", birth.seed);
    println!("birth_hash:      {}", hex(&birth.birth_hash));
    println!("reservoir_size:  {}", config.reservoir_size);
    println!("input_size:      {}", config.input_size);
    println!("output_size:     {}", config.output_size);
    println!("spectral_radius: {}", config.spectral_radius);
    println!("leak_rate:       {}", config.leak_rate);
    println!("fixed_point:     {}", config.fixed_point);
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Each line is `u1 u2 ... ; y1 y2 ...`, whitespace-separated floats split
/// on a semicolon. Blank lines and lines starting with `#` are skipped.
fn parse_training_data(contents: &str) -> Result<(Vec<Vec<f32>>, Vec<Vec<f32>>), CliError> {
    let mut inputs = Vec::new();
    let mut targets = Vec::new();

    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut halves = line.splitn(2, ';');
        let u_part = halves
            .next()
            .ok_or_else(|| CliError::Data(format!("line {}: missing input fields", lineno + 1)))?;
        let y_part = halves
            .next()
            .ok_or_else(|| CliError::Data(format!("line {}: missing ';' separator", lineno + 1)))?;

        inputs.push(parse_float_list(u_part.trim())?);
        targets.push(parse_float_list(y_part.trim())?);
    }

    if inputs.is_empty() {
        return Err(CliError::Data("no training rows found".to_string()));
    }
    Ok((inputs, targets))
}

fn parse_float_list(s: &str) -> Result<Vec<f32>, CliError> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            tok.parse::<f32>()
                .map_err(|_| CliError::Data(format!("invalid number: {tok}")))
        })
        .collect()
}

fn print_usage() {
    println!("eonctl - reservoir-computing core CLI");
    println!();
    println!("USAGE:");
    println!("    eonctl birth   --seed K --size N [--input I] [--output O] --out SNAP");
    println!("    eonctl train   --data F --out SNAP [--seed K] [--size N] [--washout W]");
    println!("    eonctl predict --in SNAP --u V");
    println!("    eonctl inspect --in SNAP");
}
